//! Destruction order for every GPU object category
//!
//! Objects are created in dependency order and must be destroyed in the
//! reverse of it. The whole order lives in `TEARDOWN_ORDER`; the renderer
//! walks that list instead of relying on field drop order, both at shutdown
//! and when construction fails halfway.

/// One category of GPU objects torn down as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownStage {
    /// Per-frame semaphores and fences
    SyncObjects,
    /// Frame command pool and the one-shot transfer pool
    CommandPool,
    /// Graphics pipeline and its layout
    Pipeline,
    /// Framebuffers, image views and the swapchain
    SurfaceChain,
    /// Render pass the framebuffers and pipeline were built against
    RenderPass,
    /// Buffers still registered in the resource table
    BufferResources,
    /// Memory allocator context
    Allocator,
    /// Logical device
    Device,
    /// Presentation surface
    Surface,
    /// Debug messenger and instance
    Instance,
}

impl TeardownStage {
    /// Stages whose objects are used by this stage's objects
    ///
    /// Everything listed must still be alive while this stage is destroyed.
    pub const fn depends_on(self) -> &'static [TeardownStage] {
        use TeardownStage::*;
        match self {
            SyncObjects => &[Device],
            CommandPool => &[Device],
            Pipeline => &[RenderPass, Device],
            SurfaceChain => &[RenderPass, Surface, Device],
            RenderPass => &[Device],
            BufferResources => &[Allocator],
            Allocator => &[Device, Instance],
            Device => &[Instance],
            Surface => &[Instance],
            Instance => &[],
        }
    }
}

/// Reverse-dependency destruction order
pub const TEARDOWN_ORDER: [TeardownStage; 10] = [
    TeardownStage::SyncObjects,
    TeardownStage::CommandPool,
    TeardownStage::Pipeline,
    TeardownStage::SurfaceChain,
    TeardownStage::RenderPass,
    TeardownStage::BufferResources,
    TeardownStage::Allocator,
    TeardownStage::Device,
    TeardownStage::Surface,
    TeardownStage::Instance,
];

/// True when every stage is destroyed before everything it depends on
pub fn is_valid_teardown_order(order: &[TeardownStage]) -> bool {
    order.iter().enumerate().all(|(position, stage)| {
        stage.depends_on().iter().all(|dependency| {
            order
                .iter()
                .position(|s| s == dependency)
                .is_some_and(|dep_position| dep_position > position)
        })
    })
}

/// A set of GPU objects, some of which may not exist yet
pub trait TeardownTarget {
    /// Whether objects of `stage` were created and not yet released
    fn is_created(&self, stage: TeardownStage) -> bool;

    /// Destroy the objects of `stage`
    fn release(&mut self, stage: TeardownStage);
}

/// Release every created stage of `target` in `TEARDOWN_ORDER`
///
/// Stages that were never created are skipped. Returns the stages released.
pub fn release_in_order<T: TeardownTarget + ?Sized>(target: &mut T) -> Vec<TeardownStage> {
    let mut released = Vec::new();
    for stage in TEARDOWN_ORDER {
        if target.is_created(stage) {
            target.release(stage);
            log::trace!("Teardown stage {stage:?} complete");
            released.push(stage);
        }
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Objects brought up in creation order until a failure
    struct PartialBuild {
        created: Vec<TeardownStage>,
        released: Vec<TeardownStage>,
    }

    impl PartialBuild {
        /// Creation stopped right before `failed`
        fn failing_at(failed: TeardownStage) -> Self {
            let creation_order = TEARDOWN_ORDER.iter().rev().copied();
            Self {
                created: creation_order.take_while(|stage| *stage != failed).collect(),
                released: Vec::new(),
            }
        }
    }

    impl TeardownTarget for PartialBuild {
        fn is_created(&self, stage: TeardownStage) -> bool {
            self.created.contains(&stage)
        }

        fn release(&mut self, stage: TeardownStage) {
            // Everything this stage uses must still be alive.
            for dependency in stage.depends_on() {
                assert!(
                    !self.released.contains(dependency),
                    "{stage:?} released after {dependency:?}"
                );
            }
            self.created.retain(|s| *s != stage);
            self.released.push(stage);
        }
    }

    #[test]
    fn test_order_respects_every_dependency() {
        assert!(is_valid_teardown_order(&TEARDOWN_ORDER));
    }

    #[test]
    fn test_order_lists_each_stage_once() {
        let unique: HashSet<_> = TEARDOWN_ORDER.iter().collect();
        assert_eq!(unique.len(), TEARDOWN_ORDER.len());
    }

    #[test]
    fn test_inversions_are_detected() {
        let mut order = TEARDOWN_ORDER;
        order.swap(6, 7); // device before allocator
        assert!(!is_valid_teardown_order(&order));

        let mut order = TEARDOWN_ORDER;
        order.swap(2, 4); // render pass before pipeline
        assert!(!is_valid_teardown_order(&order));
    }

    #[test]
    fn test_missing_dependency_is_invalid() {
        let without_device: Vec<_> = TEARDOWN_ORDER
            .iter()
            .copied()
            .filter(|s| *s != TeardownStage::Device)
            .collect();
        assert!(!is_valid_teardown_order(&without_device));
    }

    #[test]
    fn test_sync_objects_go_first_and_instance_last() {
        assert_eq!(TEARDOWN_ORDER.first(), Some(&TeardownStage::SyncObjects));
        assert_eq!(TEARDOWN_ORDER.last(), Some(&TeardownStage::Instance));
    }

    #[test]
    fn test_failed_build_releases_only_created_stages() {
        let mut build = PartialBuild::failing_at(TeardownStage::Pipeline);

        let released = release_in_order(&mut build);
        assert_eq!(
            released,
            vec![
                TeardownStage::SurfaceChain,
                TeardownStage::RenderPass,
                TeardownStage::BufferResources,
                TeardownStage::Allocator,
                TeardownStage::Device,
                TeardownStage::Surface,
                TeardownStage::Instance,
            ]
        );
        assert!(build.created.is_empty());
    }

    #[test]
    fn test_every_failure_point_releases_in_dependency_order() {
        for failed in TEARDOWN_ORDER {
            let mut build = PartialBuild::failing_at(failed);
            let expected = build.created.len();

            let released = release_in_order(&mut build);
            assert_eq!(released.len(), expected);
            assert!(!released.contains(&failed));
            assert!(build.created.is_empty());
        }
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut build = PartialBuild::failing_at(TeardownStage::SyncObjects);
        assert_eq!(release_in_order(&mut build).len(), TEARDOWN_ORDER.len() - 1);
        assert!(release_in_order(&mut build).is_empty());
    }
}
