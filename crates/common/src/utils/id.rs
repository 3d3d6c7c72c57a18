use rand::seq::SliceRandom;
use rand::{Rng, thread_rng};
use uuid::Uuid;

const ADJECTIVES: &[&str] = &[
    "happy", "quick", "smart", "bright", "cool", "fast", "great", "calm", "brave", "lucky",
];

const NOUNS: &[&str] = &[
    "fox", "wolf", "bear", "lion", "tiger", "eagle", "hawk", "otter", "lynx", "heron",
];

/// Generate a human-readable subdomain
/// Format: `{adjective}-{noun}-{0..999}`, e.g. "quick-hawk-12"
pub fn generate_subdomain() -> String {
    let mut rng = thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("happy");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("fox");
    let number: u16 = rng.gen_range(0..1000);

    format!("{}-{}-{}", adjective, noun, number)
}

/// Generate a fresh correlation identifier (32 lowercase hex characters)
pub fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}
