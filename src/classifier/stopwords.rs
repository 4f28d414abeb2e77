// src/classifier/stopwords.rs - Stopword list used by the normalizer

use anyhow::{Context, Result};
use log::info;
use std::collections::HashSet;
use std::path::Path;

/// Default Indonesian stopword list, identical to the one used when the
/// vocabulary was built. Duplicates are harmless.
const DEFAULT_INDONESIAN_STOPWORDS: &[&str] = &[
    "yang", "untuk", "pada", "ke", "para", "namun", "menurut", "antara", "dia", "dua",
    "ia", "seperti", "jika", "jika", "sehingga", "kembali", "dan", "tidak", "ini", "karena",
    "kepada", "oleh", "saat", "harus", "sementara", "setelah", "belum", "kami", "sekitar", "bagi",
    "serta", "di", "dari", "telah", "sebagai", "masih", "hal", "ketika", "adalah", "itu",
    "dalam", "bisa", "bahwa", "atau", "hanya", "kita", "dengan", "akan", "juga", "ada",
    "mereka", "sudah", "saya", "terhadap", "secara", "agar", "lain", "anda", "begitu", "mengapa",
    "kenapa", "yaitu", "yakni", "daripada", "itulah", "lagi", "maka", "tentang", "demi", "dimana",
    "kemana", "pula", "sambil", "sebelum", "sesudah", "supaya", "guna", "kah", "pun", "sampai",
    "sedangkan", "selagi", "sementara", "tetapi", "apakah", "kecuali", "sebab", "selain", "seolah", "seraya",
    "seterusnya", "tanpa", "agak", "boleh", "dapat", "dsb", "dst", "dll", "dahulu", "dulunya",
    "anu", "demikian", "tapi", "ingin", "juga", "nggak", "mari", "nanti", "melainkan", "oh",
    "ok", "seharusnya", "sebetulnya", "setiap", "setidaknya", "sesuatu", "pasti", "saja", "toh", "ya",
    "walau", "tolong", "tentu", "amat", "apalagi", "bagaimanapun",
];

/// Immutable set of words removed before stemming
#[derive(Debug, Clone)]
pub struct StopwordSet {
    words: HashSet<String>,
}

impl StopwordSet {
    pub fn indonesian() -> Self {
        Self::from_words(DEFAULT_INDONESIAN_STOPWORDS.iter().copied())
    }

    pub fn empty() -> Self {
        Self { words: HashSet::new() }
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }

    /// Load a stopword list: one word per line, `#` starts a comment
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stopword list {}", path.display()))?;
        let set = Self::from_words(
            content
                .lines()
                .map(|line| line.split('#').next().unwrap_or(""))
                .filter(|line| !line.trim().is_empty()),
        );
        info!("Loaded {} stopwords from {}", set.len(), path.display());
        Ok(set)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for StopwordSet {
    fn default() -> Self {
        Self::indonesian()
    }
}
