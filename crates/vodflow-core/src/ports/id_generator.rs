//! IdGenerator port - work-order id generation.
//!
//! A work-order id doubles as the correlation id handed to remote job
//! services, so it should be readable and unique per triggering event.

use rand::Rng;

use crate::domain::WorkOrderId;

const SUFFIX_LEN: usize = 5;
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Thread Safety: `Send + Sync`, shared between the trigger path and tests.
pub trait WorkOrderIdGenerator: Send + Sync {
    /// Generate a fresh id for an asset with the given file name.
    fn generate(&self, file_name: &str) -> WorkOrderId;
}

/// `<slug of file name>-<5 random base-36 chars>`, e.g. `my-moviemp4-k3x9a`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlugIdGenerator;

impl WorkOrderIdGenerator for SlugIdGenerator {
    fn generate(&self, file_name: &str) -> WorkOrderId {
        let mut base = slugify(file_name);
        if base.is_empty() {
            base.push_str("asset");
        }
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        WorkOrderId::new(format!("{base}-{suffix}"))
    }
}

/// Lowercase, drop anything but word characters, whitespace and `-`,
/// collapse runs of whitespace / `_` / `-` into one `-`, trim hyphens.
pub fn slugify(text: &str) -> String {
    let kept: String = text
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let mut slug = String::with_capacity(kept.len());
    let mut in_separator = false;
    for c in kept.chars() {
        if c.is_whitespace() || c == '_' || c == '-' {
            in_separator = true;
            continue;
        }
        if in_separator && !slug.is_empty() {
            slug.push('-');
        }
        in_separator = false;
        slug.push(c);
    }
    slug
}
