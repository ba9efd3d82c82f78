//! Adoption of already-linked boot types.
//!
//! A [`BootImage`] is a snapshot of the resolved boot types of one linker.
//! Another linker over the same boot class path can adopt it instead of
//! defining and linking those types again. The image is accepted only when
//! its pointer size and boot class path checksum match the adopting runtime.
use crate::{
    error::ImageError,
    linker::ClassLinker,
    types::Class,
    utils::sync::Arc,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub pointer_size: u8,
    pub boot_class_path_checksum: u32,
    pub class_count: u32,
}

impl ImageHeader {
    /// Checks the header against the adopting runtime.
    pub fn validate(&self, boot_class_path_checksum: u32) -> Result<(), ImageError> {
        let runtime = runtime_pointer_size();
        if self.pointer_size != runtime {
            return Err(ImageError::PointerSizeMismatch {
                image: self.pointer_size,
                runtime,
            });
        }
        if self.boot_class_path_checksum != boot_class_path_checksum {
            return Err(ImageError::ChecksumMismatch {
                image: self.boot_class_path_checksum,
                runtime: boot_class_path_checksum,
            });
        }
        Ok(())
    }
}

pub struct BootImage {
    header: ImageHeader,
    classes: Vec<Arc<Class>>,
}

impl BootImage {
    pub fn new(header: ImageHeader, classes: Vec<Arc<Class>>) -> Self {
        Self { header, classes }
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn classes(&self) -> &[Arc<Class>] {
        &self.classes
    }
}

fn runtime_pointer_size() -> u8 {
    std::mem::size_of::<usize>() as u8
}

impl ClassLinker {
    /// Combined checksum of the boot class path, in order.
    pub fn boot_class_path_checksum(&self) -> u32 {
        self.boot_class_path().iter().fold(1u32, |acc, dex| {
            acc.rotate_left(7) ^ dex.checksum().wrapping_mul(0x9E37_79B1)
        })
    }

    /// Captures every resolved, non-erroneous boot type. Array types are
    /// left out, the adopting linker creates them on demand.
    pub fn snapshot_boot_image(&self) -> BootImage {
        let defined = self.with_tables_locked(|| self.boot_loader.class_table().defining_classes());
        let mut classes: Vec<Arc<Class>> = defined
            .into_iter()
            .filter(|class| class.is_resolved() && !class.is_erroneous() && !class.is_array())
            .collect();
        classes.sort_by(|a, b| a.descriptor().cmp(b.descriptor()));
        let header = ImageHeader {
            pointer_size: runtime_pointer_size(),
            boot_class_path_checksum: self.boot_class_path_checksum(),
            class_count: classes.len() as u32,
        };
        debug!(classes = header.class_count, "boot image snapshot");
        BootImage { header, classes }
    }

    /// Installs the types of `image` in the boot class table and freezes
    /// the table so types defined later land in a separate set. Returns the
    /// number of types adopted; descriptors already present keep the type
    /// this linker defined.
    pub fn adopt_boot_image(&self, image: &BootImage) -> Result<usize, ImageError> {
        image.header.validate(self.boot_class_path_checksum())?;
        if let Some(class) = image.classes.iter().find(|class| !class.is_resolved() || class.is_erroneous()) {
            return Err(ImageError::UnresolvedClass(class.pretty_descriptor()));
        }

        let table = self.boot_loader.class_table();
        let adopted = self.with_tables_locked(|| {
            let mut adopted = 0;
            for class in &image.classes {
                match table.insert_if_absent(Arc::clone(class)) {
                    None => adopted += 1,
                    Some(existing) if Arc::ptr_eq(&existing, class) => {}
                    Some(_) => {
                        warn!(descriptor = class.descriptor(), "image type shadowed by a defined type");
                    }
                }
            }
            table.freeze_snapshot();
            adopted
        });
        info!(adopted, total = image.classes.len(), "boot image adopted");
        Ok(adopted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::{builder::DexFileBuilder, DexFile};

    fn core() -> Arc<DexFile> {
        DexFileBuilder::new("core.dex").with_core_library().build_arc()
    }

    fn linked(boot: &Arc<DexFile>) -> ClassLinker {
        let linker = ClassLinker::new(vec![Arc::clone(boot)]);
        linker.bootstrap().unwrap();
        linker
    }

    #[test]
    fn test_adopted_types_are_found_without_linking() {
        let boot = core();
        let source = linked(&boot);
        source.find_system_class("Ljava/lang/Exception;").unwrap();
        let image = source.snapshot_boot_image();
        assert!(image.classes().iter().any(|c| c.descriptor() == "Ljava/lang/Exception;"));

        let target = ClassLinker::new(vec![boot]);
        let adopted = target.adopt_boot_image(&image).unwrap();
        assert_eq!(adopted, image.classes().len());

        let object = source.find_system_class("Ljava/lang/Object;").unwrap();
        let found = target.find_system_class("Ljava/lang/Object;").unwrap();
        assert!(Arc::ptr_eq(&object, &found));
        assert_eq!(target.metrics().snapshot().classes_defined, 0);
        assert_eq!(target.boot_loader().class_table().num_sets(), 2);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let source = linked(&core());
        let image = source.snapshot_boot_image();
        let other = DexFileBuilder::new("other.dex").with_core_library().build_arc();
        let target = ClassLinker::new(vec![other]);
        let err = target.adopt_boot_image(&image).unwrap_err();
        assert!(matches!(err, ImageError::ChecksumMismatch { .. }));
        assert!(target.boot_loader().class_table().is_empty());
    }

    #[test]
    fn test_pointer_size_mismatch_rejected() {
        let header = ImageHeader {
            pointer_size: runtime_pointer_size() * 2,
            boot_class_path_checksum: 0,
            class_count: 0,
        };
        assert_eq!(
            header.validate(0),
            Err(ImageError::PointerSizeMismatch {
                image: runtime_pointer_size() * 2,
                runtime: runtime_pointer_size(),
            })
        );
    }
}
