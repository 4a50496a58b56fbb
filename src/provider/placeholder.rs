//! Last-resort image generator used when every image provider is exhausted.

use crate::types::SectionIndex;

pub const PLACEHOLDER_PROVIDER: &str = "placeholder";

/// Deterministic placeholder image references: same section and prompt, same ref.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderImageGenerator;

impl PlaceholderImageGenerator {
    pub fn image_ref(&self, section_index: SectionIndex, prompt: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(section_index as u64).to_le_bytes());
        hasher.update(prompt.as_bytes());
        let digest = hasher.finalize();
        format!(
            "placeholder://section/{}/{}",
            section_index,
            &digest.to_hex()[..16]
        )
    }

    pub fn is_placeholder_ref(image_ref: &str) -> bool {
        image_ref.starts_with("placeholder://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_are_stable_per_section_and_prompt() {
        let generator = PlaceholderImageGenerator;
        let a = generator.image_ref(2, "tides");
        assert_eq!(a, generator.image_ref(2, "tides"));
        assert_ne!(a, generator.image_ref(3, "tides"));
        assert_ne!(a, generator.image_ref(2, "orbits"));
        assert!(a.starts_with("placeholder://section/2/"));
        assert!(PlaceholderImageGenerator::is_placeholder_ref(&a));
    }
}
