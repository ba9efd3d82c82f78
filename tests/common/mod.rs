#![allow(dead_code)]

use dexlink::{
    config::{FenceStrategy, LinkerConfig},
    dex::{builder::DexFileBuilder, DexFile, MethodSignature},
    linker::ClassLinker,
    utils::sync::Arc,
};

pub fn core() -> Arc<DexFile> {
    DexFileBuilder::new("core.dex").with_core_library().build_arc()
}

pub fn sig(signature: &str) -> MethodSignature {
    MethodSignature::parse(signature).unwrap()
}

pub fn immediate() -> LinkerConfig {
    LinkerConfig {
        fence: FenceStrategy::Immediate,
        ..LinkerConfig::default()
    }
}

pub fn checkpoint(batch: usize) -> LinkerConfig {
    LinkerConfig {
        fence: FenceStrategy::Checkpoint,
        visibility_batch_size: batch,
        ..LinkerConfig::default()
    }
}

/// A linker over the core library with the core types initialized.
pub fn bootstrapped(config: LinkerConfig) -> ClassLinker {
    let linker = ClassLinker::builder(vec![core()]).config(config).build();
    linker.bootstrap().unwrap();
    linker
}
