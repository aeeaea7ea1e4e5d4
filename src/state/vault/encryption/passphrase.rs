//! Operator passphrase handling
//!
//! Holds the passphrase in zeroizing memory, reads the auto-unseal credential
//! from the environment and grades passphrase strength for advisory logging.

use std::fmt;

use zeroize::Zeroizing;

/// environment variable carrying the auto-unseal passphrase
pub const AUTO_UNSEAL_ENV_VAR: &str = "LYNDRIX_MASTER_KEY";

/// An operator passphrase.
///
/// Never printed: `Debug` and `Display` are redacted. The backing memory is
/// wiped when the last copy is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(passphrase.into()))
    }

    /// the secret itself; callers must not log or persist it
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a passphrase from an environment variable.
    ///
    /// Unset, non-unicode, and empty values all count as absent.
    pub fn from_env_var(var_name: &str) -> Option<Self> {
        let value = Zeroizing::new(std::env::var(var_name).ok()?);
        if value.is_empty() {
            return None;
        }
        Some(Self(value))
    }

    /// grades this passphrase, see [PassphraseStrength]
    pub fn strength(&self) -> PassphraseStrength {
        PassphraseStrength::analyze(self.expose())
    }
}

impl From<String> for Passphrase {
    fn from(passphrase: String) -> Self {
        Self(Zeroizing::new(passphrase))
    }
}

impl From<&str> for Passphrase {
    fn from(passphrase: &str) -> Self {
        Self::new(passphrase)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

impl fmt::Display for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Passphrase strength classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum PassphraseStrength {
    /// Very weak: < 8 characters
    #[strum(to_string = "very weak")]
    VeryWeak,
    /// Weak: 8-11 characters
    #[strum(to_string = "weak")]
    Weak,
    /// Moderate: 12-15 characters, basic complexity
    #[strum(to_string = "moderate")]
    Moderate,
    /// Strong: 16+ characters with good complexity
    #[strum(to_string = "strong")]
    Strong,
    /// Very Strong: 20+ characters with excellent complexity
    #[strum(to_string = "very strong")]
    VeryStrong,
}

impl PassphraseStrength {
    /// Check if strength meets the recommended minimum.
    ///
    /// Weaker passphrases are still accepted; the coordinator only warns.
    pub fn is_recommended(&self) -> bool {
        *self >= Self::Moderate
    }

    /// Analyze passphrase strength
    ///
    /// Length is the primary factor; poor character diversity downgrades
    /// the result by one step.
    pub fn analyze(passphrase: &str) -> Self {
        let base_strength = match passphrase.chars().count() {
            0..=7 => Self::VeryWeak,
            8..=11 => Self::Weak,
            12..=15 => Self::Moderate,
            16..=19 => Self::Strong,
            _ => Self::VeryStrong,
        };

        let has_lowercase = passphrase.chars().any(|c| c.is_lowercase());
        let has_uppercase = passphrase.chars().any(|c| c.is_uppercase());
        let has_digit = passphrase.chars().any(|c| c.is_ascii_digit());
        let has_symbol = passphrase
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

        let diversity_score =
            has_lowercase as u8 + has_uppercase as u8 + has_digit as u8 + has_symbol as u8;

        match (base_strength, diversity_score) {
            (Self::VeryStrong, 0..=2) => Self::Strong,
            (Self::Strong, 0..=1) => Self::Moderate,
            (Self::Moderate, 0..=1) => Self::Weak,
            _ => base_strength,
        }
    }
}
