use clap::Parser;
use dexlink::{
    types::{tables::ImtEntry, Class},
    LinkerArgs,
};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dump the linked layout of a type: fields, vtable, iftable and IMT"
)]
struct Args {
    #[command(flatten)]
    linker: LinkerArgs,
    /// The descriptor of the type to dump (e.g. Ljava/lang/String;)
    descriptor: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    dexlink::init_tracing();

    let (linker, loader) = match args.linker.build() {
        Ok(built) => built,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };
    match linker.find_class(&args.descriptor, &loader) {
        Ok(class) => {
            print_class(&class);
            ExitCode::SUCCESS
        }
        Err(error) => {
            dexlink::report_error(&args.descriptor, &error);
            ExitCode::FAILURE
        }
    }
}

fn print_class(class: &Class) {
    println!("{} ({})", class.pretty_descriptor(), class.status());
    if let Some(super_class) = class.super_class() {
        println!("  extends {}", super_class.pretty_descriptor());
    }
    println!(
        "  object size: {}, class size: {}",
        class.object_size(),
        class.class_size()
    );
    println!(
        "  reference offsets: {:#010x} ({} instance, {} static)",
        class.reference_instance_offsets(),
        class.num_reference_instance_fields(),
        class.num_reference_static_fields()
    );

    println!("\nInstance fields:");
    for field in class.instance_fields().iter() {
        println!(
            "  +{:<4} {} {} ({} bytes)",
            field.offset(),
            field.type_descriptor(),
            field.name(),
            field.size()
        );
    }
    println!("\nStatic fields:");
    for field in class.static_fields().iter() {
        println!(
            "  +{:<4} {} {}",
            field.offset(),
            field.type_descriptor(),
            field.name()
        );
    }

    println!("\nDirect methods:");
    for method in class.direct_methods().iter() {
        println!("  {} [{:?}]", method.pretty_method(), method.entry_point());
    }

    let vtable = class.vtable();
    println!(
        "\nVirtual table ({} slots{}):",
        vtable.len(),
        if vtable.is_inherited() { ", shared with superclass" } else { "" }
    );
    for (slot, method) in vtable.iter().enumerate() {
        let note = if method.is_default_conflicting() {
            " (default conflict)"
        } else if method.is_miranda() {
            " (miranda)"
        } else if method.is_copied() {
            " (default)"
        } else {
            ""
        };
        println!("  {:>3}: {}{} [{:?}]", slot, method.pretty_method(), note, method.entry_point());
    }

    println!("\nInterface table:");
    for entry in class.iftable().entries() {
        println!("  {}", entry.interface.pretty_descriptor());
        for method in entry.methods.iter() {
            println!("    -> {}", method.pretty_method());
        }
    }

    match class.imt() {
        None => println!("\nNo interface method table"),
        Some(imt) => {
            println!(
                "\nInterface method table: {} occupied, {} conflicts",
                imt.occupied_slots(),
                imt.conflict_slots()
            );
            for (slot, entry) in imt.entries().iter().enumerate() {
                match entry {
                    ImtEntry::Unimplemented => {}
                    ImtEntry::Method(method) => println!("  {:>2}: {}", slot, method.pretty_method()),
                    ImtEntry::Conflict(table) => println!("  {:>2}: conflict of {}", slot, table.len()),
                }
            }
        }
    }
}
