// src/session/identity.rs
use rand::Rng;
use std::fmt;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];

/// The fingerprint a session presents: user agent plus viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentitySignature {
    index: usize,
}

impl IdentitySignature {
    pub fn pool_size() -> usize {
        USER_AGENTS.len() * VIEWPORTS.len()
    }

    pub fn from_index(index: usize) -> Self {
        Self { index: index % Self::pool_size() }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn user_agent(&self) -> &'static str {
        USER_AGENTS[self.index / VIEWPORTS.len()]
    }

    pub fn viewport(&self) -> (u32, u32) {
        VIEWPORTS[self.index % VIEWPORTS.len()]
    }

    /// Picks a signature uniformly at random among all signatures other than `current`.
    pub fn pick<R: Rng + ?Sized>(rng: &mut R, current: Option<IdentitySignature>) -> Self {
        let total = Self::pool_size();
        match current {
            Some(current) if total > 1 => {
                let mut index = rng.gen_range(0..total - 1);
                if index >= current.index {
                    index += 1;
                }
                Self { index }
            }
            _ => Self { index: rng.gen_range(0..total) },
        }
    }
}

impl fmt::Display for IdentitySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.viewport();
        write!(f, "#{} {}x{} {}", self.index, w, h, self.user_agent())
    }
}
