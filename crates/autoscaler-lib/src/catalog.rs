//! Instance shape catalog
//!
//! Read-only lookup table of instance hardware profiles, loaded once at
//! startup. Lookups return shapes ordered by ascending vCPU count (the cost
//! proxy), ties broken by family generation with the newest first.

use crate::error::PolicyError;
use crate::models::{Architecture, InstanceShape, ResourceVector};

/// Immutable catalog of instance shapes
#[derive(Debug, Clone)]
pub struct InstanceCatalog {
    shapes: Vec<InstanceShape>,
}

impl InstanceCatalog {
    /// Build a catalog from explicit shapes
    pub fn new(shapes: Vec<InstanceShape>) -> Self {
        Self { shapes }
    }

    /// Built-in table covering common general/compute/memory families on
    /// both architectures, two generations each
    pub fn builtin() -> Self {
        let mut shapes = Vec::new();
        // (family, architecture, GiB of memory per vCPU)
        let families: &[(&str, Architecture, f64)] = &[
            ("m6i", Architecture::Amd64, 4.0),
            ("m7i", Architecture::Amd64, 4.0),
            ("c6i", Architecture::Amd64, 2.0),
            ("c7i", Architecture::Amd64, 2.0),
            ("r6i", Architecture::Amd64, 8.0),
            ("r7i", Architecture::Amd64, 8.0),
            ("m6g", Architecture::Arm64, 4.0),
            ("m7g", Architecture::Arm64, 4.0),
            ("c6g", Architecture::Arm64, 2.0),
            ("c7g", Architecture::Arm64, 2.0),
            ("r6g", Architecture::Arm64, 8.0),
            ("r7g", Architecture::Arm64, 8.0),
        ];
        for (family, arch, gib_per_vcpu) in families {
            for vcpus in [2u32, 4, 8, 16, 32] {
                shapes.push(InstanceShape {
                    family: family.to_string(),
                    architecture: *arch,
                    vcpus,
                    memory_gib: vcpus as f64 * gib_per_vcpu,
                    supports_spot: true,
                });
            }
        }
        Self::new(shapes)
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn all(&self) -> &[InstanceShape] {
        &self.shapes
    }

    /// Does the catalog carry any shape for this architecture?
    pub fn knows_architecture(&self, architecture: Architecture) -> bool {
        self.shapes.iter().any(|s| s.architecture == architecture)
    }

    /// Shapes for `architecture` with at least `min` capacity, ordered by
    /// ascending vCPU count, ties broken newest generation first
    pub fn shapes_for(
        &self,
        architecture: Architecture,
        min: ResourceVector,
    ) -> Result<Vec<&InstanceShape>, PolicyError> {
        if !self.knows_architecture(architecture) {
            return Err(PolicyError::UnknownArchitecture(architecture.to_string()));
        }

        let mut matching: Vec<&InstanceShape> = self
            .shapes
            .iter()
            .filter(|s| s.architecture == architecture && s.capacity().covers(&min))
            .collect();

        matching.sort_by(|a, b| {
            a.vcpus
                .cmp(&b.vcpus)
                .then(b.generation().cmp(&a.generation()))
                .then(a.family.cmp(&b.family))
        });

        Ok(matching)
    }
}

impl Default for InstanceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
