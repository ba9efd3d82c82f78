mod common;

use common::{bootstrapped, checkpoint, immediate};
use dexlink::{
    dex::builder::DexFileBuilder,
    error::{LinkError, Throwable},
    linker::ClassLinker,
    types::{ClassStatus, Method},
    utils::sync::{Arc, AtomicBool, AtomicUsize, Ordering},
};
use std::{thread, time::Duration};

#[test]
fn test_initializer_runs_once_across_threads() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let dex = DexFileBuilder::new("app.dex")
        .class("LSlow;", |c| c.public().clinit())
        .build_arc();
    let linker = Arc::new(
        ClassLinker::builder(vec![common::core()])
            .config(immediate())
            .interpreter(move |_: &ClassLinker, _: &Arc<Method>| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Ok(())
            })
            .build(),
    );
    linker.bootstrap().unwrap();
    let before = linker.metrics().snapshot().classes_initialized;
    let loader = linker.create_path_class_loader(vec![dex]);
    let class = linker.find_class("LSlow;", &loader).unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let linker = Arc::clone(&linker);
            let class = Arc::clone(&class);
            thread::spawn(move || linker.ensure_initialized(&class, true, true).unwrap())
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(class.is_visibly_initialized());
    assert_eq!(linker.metrics().snapshot().classes_initialized, before + 1);
}

#[test]
fn test_failed_super_blocks_subclass() {
    let ran = Arc::new(AtomicBool::new(false));
    let child_ran = Arc::clone(&ran);
    let dex = DexFileBuilder::new("app.dex")
        .class("LParent;", |c| c.public().clinit())
        .class("LChild;", |c| c.public().extends("LParent;").clinit())
        .build_arc();
    let linker = ClassLinker::builder(vec![common::core()])
        .config(immediate())
        .interpreter(move |_: &ClassLinker, method: &Arc<Method>| {
            match method.declaring_class().unwrap().descriptor() {
                "LParent;" => Err(Throwable::error("Ljava/lang/AssertionError;", "parent")),
                _ => {
                    child_ran.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
        .build();
    let loader = linker.create_path_class_loader(vec![dex]);
    let child = linker.find_class("LChild;", &loader).unwrap();
    let parent = linker.find_class("LParent;", &loader).unwrap();

    let err = linker.ensure_initialized(&child, true, true).unwrap_err();
    assert!(matches!(err, LinkError::Thrown(ref t) if t.descriptor == "Ljava/lang/AssertionError;"));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(child.status(), ClassStatus::ErrorResolved);
    assert_eq!(parent.status(), ClassStatus::ErrorResolved);

    for _ in 0..1000 {
        let again = linker.ensure_initialized(&parent, true, true).unwrap_err();
        assert_eq!(again.managed_class(), "Ljava/lang/NoClassDefFoundError;");
    }
    assert_eq!(linker.metrics().snapshot().initialization_failures, 2);
}

#[test]
fn test_waiter_sees_failure_of_initializing_thread() {
    let dex = DexFileBuilder::new("app.dex")
        .class("LDoomed;", |c| c.public().clinit())
        .build_arc();
    let linker = Arc::new(
        ClassLinker::builder(vec![common::core()])
            .config(immediate())
            .interpreter(|_: &ClassLinker, _: &Arc<Method>| {
                thread::sleep(Duration::from_millis(30));
                Err(Throwable::exception("Ljava/io/IOException;", "disk"))
            })
            .build(),
    );
    let loader = linker.create_path_class_loader(vec![dex]);
    let class = linker.find_class("LDoomed;", &loader).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let linker = Arc::clone(&linker);
            let class = Arc::clone(&class);
            thread::spawn(move || linker.ensure_initialized(&class, true, true).unwrap_err())
        })
        .collect();
    let errors: Vec<LinkError> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wrapped = errors
        .iter()
        .filter(|e| matches!(e, LinkError::ExceptionInInitializer { .. }))
        .count();
    assert_eq!(wrapped, 1);
    assert!(errors.iter().all(|e| e.is_error_kind()));
    assert_eq!(linker.metrics().snapshot().initialization_failures, 1);
}

#[test]
fn test_checkpoint_publication_with_attached_threads() {
    let linker = Arc::new(bootstrapped(checkpoint(2)));
    let dex = DexFileBuilder::new("app.dex")
        .class("LOne;", |c| c.public().static_method("get", "()I"))
        .class("LTwo;", |c| c.public().static_method("get", "()I"))
        .class("LThree;", |c| c.public().static_method("get", "()I"))
        .build_arc();
    let loader = linker.create_path_class_loader(vec![dex]);

    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..3)
        .map(|_| {
            let linker = Arc::clone(&linker);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                linker.threads().register_thread();
                while !stop.load(Ordering::Acquire) {
                    linker.threads().safe_point();
                    thread::yield_now();
                }
                linker.threads().unregister_thread();
            })
        })
        .collect();

    let classes: Vec<_> = ["LOne;", "LTwo;", "LThree;"]
        .iter()
        .map(|d| linker.find_class(d, &loader).unwrap())
        .collect();
    for class in &classes {
        assert!(linker.ensure_initialized(class, true, true).unwrap());
    }
    linker.make_initialized_classes_visibly_initialized(true);
    for class in &classes {
        assert_eq!(class.status(), ClassStatus::VisiblyInitialized);
    }

    stop.store(true, Ordering::Release);
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(linker.metrics().snapshot().checkpoint_publications >= 2);
}

#[test]
fn test_fast_path_requests_publication() {
    let mut config = checkpoint(64);
    config.make_visible_trigger = 4;
    let linker = bootstrapped(config);
    let dex = DexFileBuilder::new("app.dex")
        .class("LHot;", |c| c.public())
        .build_arc();
    let loader = linker.create_path_class_loader(vec![dex]);
    let class = linker.find_class("LHot;", &loader).unwrap();
    linker.ensure_initialized(&class, true, true).unwrap();
    assert_eq!(class.status(), ClassStatus::Initialized);

    for _ in 0..4 {
        assert!(linker.ensure_initialized(&class, true, true).unwrap());
    }
    // No other attached thread: the requester runs the checkpoint itself.
    assert_eq!(class.status(), ClassStatus::VisiblyInitialized);
}
