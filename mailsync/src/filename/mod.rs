//! # Filename
//!
//! Module dedicated to local message file names. The
//! [`FilenameGenerator`] derives a safe, bounded-length file name
//! from the message date and subject. Names are bounded, not unique:
//! collisions are detected by the caller at rename time.

mod error;

use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, thread_rng, Rng, SeedableRng};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

#[doc(inline)]
pub use self::error::{Error, Result};

/// The extension of local message files.
pub const EXTENSION: &str = ".eml";

/// The prefix of local message files being written.
///
/// Files starting with this prefix are never considered as messages.
pub const TEMP_PREFIX: &str = "._";

/// The maximum length of a file name, whatever the directory.
pub const MAX_FILENAME_LEN: usize = 64;

/// The maximum length of a full path.
const MAX_PATH_LEN: usize = 255;

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MIN_SUFFIX_LEN: usize = 6;
const SUFFIX_LEN_BONUS: usize = 16;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());

/// The file name generator.
///
/// Random suffixes come from the thread-local generator, unless a
/// seed is given. Clones of a seeded generator share the same
/// sequence.
#[derive(Clone, Debug)]
pub struct FilenameGenerator {
    max_len: usize,
    rng: Option<Arc<Mutex<StdRng>>>,
}

impl Default for FilenameGenerator {
    fn default() -> Self {
        Self {
            max_len: MAX_FILENAME_LEN,
            rng: None,
        }
    }
}

impl FilenameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = Some(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
    }

    /// Draw random suffixes from a generator seeded with the given
    /// value, which makes the sequence of names reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.set_seed(seed);
        self
    }

    /// Compute the length budget of a file name inside the given
    /// directory.
    ///
    /// The budget does not include the optional temporary prefix.
    pub fn budget(&self, dir: &Path, temp: bool) -> Option<usize> {
        let prefix_len = if temp { TEMP_PREFIX.len() } else { 0 };
        let dir_len = dir.as_os_str().len();

        MAX_PATH_LEN
            .checked_sub(dir_len + prefix_len + 1)
            .map(|budget| budget.min(self.max_len))
    }

    /// Generate a file name, prefix included.
    pub fn generate(
        &self,
        dir: &Path,
        date: Option<&DateTime<FixedOffset>>,
        label: &str,
        temp: bool,
    ) -> Result<String> {
        match &self.rng {
            Some(rng) => {
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.generate_with_rng(&mut *rng, dir, date, label, temp)
            }
            None => self.generate_with_rng(&mut thread_rng(), dir, date, label, temp),
        }
    }

    /// Generate a file name, prefix included, using the given random
    /// generator for the disambiguation suffix.
    pub fn generate_with_rng(
        &self,
        rng: &mut impl Rng,
        dir: &Path,
        date: Option<&DateTime<FixedOffset>>,
        label: &str,
        temp: bool,
    ) -> Result<String> {
        let overflow = || Error::BudgetExhaustedError(dir.display().to_string(), 0);
        let budget = self.budget(dir, temp).ok_or_else(overflow)?;

        // `_` + at least one random char + extension
        let fixed_len = 1 + EXTENSION.len();
        if budget < fixed_len + 1 {
            return Err(Error::BudgetExhaustedError(
                dir.display().to_string(),
                budget,
            ));
        }

        let random_len = MIN_SUFFIX_LEN + SUFFIX_LEN_BONUS.saturating_sub(label.chars().count());
        let random_len = random_len.min(budget - fixed_len);
        let suffix = format!("_{}{EXTENSION}", random_suffix(rng, random_len));

        let label = match date {
            Some(date) => format!("{} {label}", date.timestamp()),
            None => label.to_owned(),
        };

        let mut slug = slugify(&label);
        // slugs are ASCII, byte truncation is safe
        slug.truncate(budget - suffix.len());

        let prefix = if temp { TEMP_PREFIX } else { "" };
        Ok(format!("{prefix}{slug}{suffix}"))
    }
}

/// Turn any string into a lowercase ASCII slug made of alphanumeric
/// chars, underscores and hyphens.
pub fn slugify(value: &str) -> String {
    let ascii: String = value.nfkd().filter(char::is_ascii).collect();
    let safe = UNSAFE_CHARS.replace_all(&ascii, "");
    let safe = safe.trim().to_lowercase();
    SEPARATORS.replace_all(&safe, "-").into_owned()
}

fn random_suffix(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}
