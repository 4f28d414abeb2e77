// src/classifier/stemmer.rs - Dictionary-backed Indonesian confix-stripping stemmer

use anyhow::{Context, Result};
use log::{debug, info};
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

/// Strategy interface for reducing words to their root form
pub trait Stemmer: Send + Sync {
    /// Stem every word of `text`, returning the roots joined by single spaces
    fn stem(&self, text: &str) -> String;

    fn name(&self) -> &str;
}

/// Set of known root words (kata dasar)
#[derive(Debug, Clone, Default)]
pub struct RootDictionary {
    words: HashSet<String>,
}

impl RootDictionary {
    pub fn empty() -> Self {
        Self::default()
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

    /// One root word per line
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read root dictionary {}", path.display()))?;
        let dictionary = Self::from_words(content.lines());
        info!("Loaded {} root words from {}", dictionary.len(), path.display());
        Ok(dictionary)
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AffixKind {
    Particle,
    Possessive,
    DerivationalSuffix,
    DerivationalPrefix,
}

impl AffixKind {
    fn is_suffix(self) -> bool {
        !matches!(self, AffixKind::DerivationalPrefix)
    }
}

#[derive(Debug, Clone)]
struct Removal {
    subject: String,
    result: String,
    removed: String,
    kind: AffixKind,
}

/// One disambiguation rule: a pattern and how to rebuild the root from its captures
struct PrefixRule {
    name: &'static str,
    pattern: Regex,
    build: fn(&Captures) -> Option<String>,
}

impl PrefixRule {
    fn apply(&self, word: &str) -> Option<String> {
        self.pattern.captures(word).and_then(|caps| (self.build)(&caps))
    }
}

fn cap<'a>(caps: &'a Captures, i: usize) -> &'a str {
    caps.get(i).map(|m| m.as_str()).unwrap_or("")
}

type RuleDef = (&'static str, &'static str, fn(&Captures) -> Option<String>);

fn rule(name: &'static str, pattern: &'static str, build: fn(&Captures) -> Option<String>) -> RuleDef {
    (name, pattern, build)
}

/// Prefix disambiguation rules, grouped. Within a group the first candidate found in
/// the dictionary wins, otherwise the last rule's candidate is used.
fn prefix_rule_table() -> Vec<Vec<RuleDef>> {
    vec![
        vec![
            rule("1a", r"^ber([aiueo].*)$", |c| Some(cap(c, 1).to_string())),
            rule("1b", r"^ber([aiueo].*)$", |c| Some(format!("r{}", cap(c, 1)))),
        ],
        vec![rule("2", r"^ber([bcdfghjklmnpqstvwxyz])([a-z])(.*)$", |c| {
            if cap(c, 3).starts_with("er") {
                return None;
            }
            Some(format!("{}{}{}", cap(c, 1), cap(c, 2), cap(c, 3)))
        })],
        vec![rule("3", r"^ber([bcdfghjklmnpqrstvwxyz])([a-z])er([aiueo])(.*)$", |c| {
            if cap(c, 1) == "r" {
                return None;
            }
            Some(format!("{}{}er{}{}", cap(c, 1), cap(c, 2), cap(c, 3), cap(c, 4)))
        })],
        vec![rule("4", r"^belajar$", |_| Some("ajar".to_string()))],
        vec![rule("5", r"^be([bcdfghjklmnpqstvwxyz])(er[bcdfghjklmnpqrstvwxyz])(.*)$", |c| {
            Some(format!("{}{}{}", cap(c, 1), cap(c, 2), cap(c, 3)))
        })],
        vec![
            rule("6a", r"^ter([aiueo].*)$", |c| Some(cap(c, 1).to_string())),
            rule("6b", r"^ter([aiueo].*)$", |c| Some(format!("r{}", cap(c, 1)))),
        ],
        vec![rule("7", r"^ter([bcdfghjklmnpqrstvwxyz])er([aiueo].*)$", |c| {
            if cap(c, 1) == "r" {
                return None;
            }
            Some(format!("{}er{}", cap(c, 1), cap(c, 2)))
        })],
        vec![rule("8", r"^ter([bcdfghjklmnpqrstvwxyz])(.*)$", |c| {
            if cap(c, 1) == "r" || cap(c, 2).starts_with("er") {
                return None;
            }
            Some(format!("{}{}", cap(c, 1), cap(c, 2)))
        })],
        vec![rule("9", r"^te([bcdfghjklmnpqrstvwxyz])er([bcdfghjklmnpqrstvwxyz])(.*)$", |c| {
            if cap(c, 1) == "r" {
                return None;
            }
            Some(format!("{}er{}{}", cap(c, 1), cap(c, 2), cap(c, 3)))
        })],
        vec![rule("10", r"^me([lrwy])([aiueo])(.*)$", |c| {
            Some(format!("{}{}{}", cap(c, 1), cap(c, 2), cap(c, 3)))
        })],
        vec![rule("11", r"^mem([bfv])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2))))],
        vec![rule("12", r"^mempe(.*)$", |c| Some(format!("pe{}", cap(c, 1))))],
        vec![
            rule("13a", r"^mem([aiueo])(.*)$", |c| Some(format!("m{}{}", cap(c, 1), cap(c, 2)))),
            rule("13b", r"^mem([aiueo])(.*)$", |c| Some(format!("p{}{}", cap(c, 1), cap(c, 2)))),
        ],
        vec![rule("14", r"^men([cdjstz])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2))))],
        vec![
            rule("15a", r"^men([aiueo])(.*)$", |c| Some(format!("n{}{}", cap(c, 1), cap(c, 2)))),
            rule("15b", r"^men([aiueo])(.*)$", |c| Some(format!("t{}{}", cap(c, 1), cap(c, 2)))),
        ],
        vec![rule("16", r"^meng([ghqk])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2))))],
        vec![
            rule("17a", r"^meng([aiueo])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2)))),
            rule("17b", r"^meng([aiueo])(.*)$", |c| Some(format!("k{}{}", cap(c, 1), cap(c, 2)))),
            rule("17c", r"^menge(.*)$", |c| Some(cap(c, 1).to_string())),
            rule("17d", r"^meng([aiueo])(.*)$", |c| Some(format!("ng{}{}", cap(c, 1), cap(c, 2)))),
        ],
        vec![
            rule("18a", r"^meny([aiueo])(.*)$", |c| Some(format!("ny{}{}", cap(c, 1), cap(c, 2)))),
            rule("18b", r"^meny([aiueo])(.*)$", |c| Some(format!("s{}{}", cap(c, 1), cap(c, 2)))),
        ],
        vec![rule("19", r"^memp([abcdfghijklmopqrstuvwxyz])(.*)$", |c| {
            Some(format!("p{}{}", cap(c, 1), cap(c, 2)))
        })],
        vec![rule("20", r"^pe([wy])([aiueo])(.*)$", |c| {
            Some(format!("{}{}{}", cap(c, 1), cap(c, 2), cap(c, 3)))
        })],
        vec![
            rule("21a", r"^per([aiueo])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2)))),
            rule("21b", r"^pe(r[aiueo])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2)))),
        ],
        vec![rule("23", r"^per([bcdfghjklmnpqrstvwxyz])([a-z])(.*)$", |c| {
            if cap(c, 3).starts_with("er") {
                return None;
            }
            Some(format!("{}{}{}", cap(c, 1), cap(c, 2), cap(c, 3)))
        })],
        vec![rule("24", r"^per([bcdfghjklmnpqrstvwxyz])([a-z])er([aiueo])(.*)$", |c| {
            if cap(c, 1) == "r" {
                return None;
            }
            Some(format!("{}{}er{}{}", cap(c, 1), cap(c, 2), cap(c, 3), cap(c, 4)))
        })],
        vec![rule("25", r"^pem([bfv])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2))))],
        vec![
            rule("26a", r"^pem([aiueo])(.*)$", |c| Some(format!("m{}{}", cap(c, 1), cap(c, 2)))),
            rule("26b", r"^pem([aiueo])(.*)$", |c| Some(format!("p{}{}", cap(c, 1), cap(c, 2)))),
        ],
        vec![rule("27", r"^pen([cdjstz])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2))))],
        vec![
            rule("28a", r"^pen([aiueo])(.*)$", |c| Some(format!("n{}{}", cap(c, 1), cap(c, 2)))),
            rule("28b", r"^pen([aiueo])(.*)$", |c| Some(format!("t{}{}", cap(c, 1), cap(c, 2)))),
        ],
        vec![rule("29", r"^peng([bcdfghjklmnpqrstvwxyz])(.*)$", |c| {
            Some(format!("{}{}", cap(c, 1), cap(c, 2)))
        })],
        vec![
            rule("30a", r"^peng([aiueo])(.*)$", |c| Some(format!("{}{}", cap(c, 1), cap(c, 2)))),
            rule("30b", r"^peng([aiueo])(.*)$", |c| Some(format!("k{}{}", cap(c, 1), cap(c, 2)))),
            rule("30c", r"^penge(.*)$", |c| Some(cap(c, 1).to_string())),
        ],
        vec![
            rule("31a", r"^peny([aiueo])(.*)$", |c| Some(format!("ny{}{}", cap(c, 1), cap(c, 2)))),
            rule("31b", r"^peny([aiueo])(.*)$", |c| Some(format!("s{}{}", cap(c, 1), cap(c, 2)))),
        ],
        vec![rule("32", r"^pel([aiueo])(.*)$", |c| {
            if cap(c, 0) == "pelajar" {
                return Some("ajar".to_string());
            }
            Some(format!("l{}{}", cap(c, 1), cap(c, 2)))
        })],
        vec![rule("34", r"^pe([bcdfghjklmnpqrstvwxyz])(.*)$", |c| {
            if matches!(cap(c, 1), "r" | "w" | "y" | "l" | "m" | "n") || cap(c, 2).starts_with("er") {
                return None;
            }
            Some(format!("{}{}", cap(c, 1), cap(c, 2)))
        })],
        vec![rule("35", r"^ter([bcdfghjkpqstvxz])(er[bcdfghjklmnpqrstvwxyz])(.*)$", |c| {
            Some(format!("{}{}{}", cap(c, 1), cap(c, 2), cap(c, 3)))
        })],
        vec![rule("36", r"^pe([bcdfghjkpqstvxz])(er[bcdfghjklmnpqrstvwxyz])(.*)$", |c| {
            Some(format!("{}{}{}", cap(c, 1), cap(c, 2), cap(c, 3)))
        })],
        vec![rule("41", r"^ku(.*)$", |c| Some(cap(c, 1).to_string()))],
        vec![rule("42", r"^kau(.*)$", |c| Some(cap(c, 1).to_string()))],
    ]
}

const POSSESSIVE_AND_PARTICLE_SUFFIXES: &[&str] = &["ku", "mu", "nya", "lah", "kah", "tah", "pun"];
const CACHE_LIMIT: usize = 50_000;

/// Indonesian stemmer using the enhanced confix-stripping algorithm.
///
/// Every candidate is validated against the root dictionary; words whose root
/// cannot be found are returned unchanged.
pub struct IndonesianStemmer {
    dictionary: RootDictionary,
    text_cleanup: Regex,
    particle: Regex,
    possessive: Regex,
    derivational_suffix: Regex,
    plain_prefix: Regex,
    plural_suffix: Regex,
    plural_split: Regex,
    precedence: Vec<Regex>,
    prefix_groups: Vec<Vec<PrefixRule>>,
    cache: RwLock<HashMap<String, String>>,
}

impl IndonesianStemmer {
    pub fn new(dictionary: RootDictionary) -> Result<Self> {
        let mut prefix_groups = Vec::new();
        for group in prefix_rule_table() {
            let mut rules = Vec::with_capacity(group.len());
            for (name, pattern, build) in group {
                let pattern = Regex::new(pattern)
                    .with_context(|| format!("Invalid prefix rule {}", name))?;
                rules.push(PrefixRule { name, pattern, build });
            }
            prefix_groups.push(rules);
        }

        let precedence = [
            r"^be(.*)lah$",
            r"^be(.*)an$",
            r"^me(.*)i$",
            r"^di(.*)i$",
            r"^pe(.*)i$",
            r"^ter(.*)i$",
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid confix precedence pattern")?;

        Ok(Self {
            dictionary,
            text_cleanup: Regex::new(r"[^a-z0-9 -]")?,
            particle: Regex::new(r"-*(lah|kah|tah|pun)$")?,
            possessive: Regex::new(r"-*(ku|mu|nya)$")?,
            derivational_suffix: Regex::new(r"(is|isme|isasi|i|kan|an)$")?,
            plain_prefix: Regex::new(r"^(di|ke|se)")?,
            plural_suffix: Regex::new(r"^(.*)-(ku|mu|nya|lah|kah|tah|pun)$")?,
            plural_split: Regex::new(r"^(.*)-(.*)$")?,
            precedence,
            prefix_groups,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn dictionary(&self) -> &RootDictionary {
        &self.dictionary
    }

    /// Stem a single word, consulting the memo first
    pub fn stem_word(&self, word: &str) -> String {
        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(word) {
                return hit.clone();
            }
        }

        let root = if self.is_plural(word) {
            self.stem_plural_word(word)
        } else {
            self.stem_singular_word(word)
        };

        if let Ok(mut cache) = self.cache.write() {
            if cache.len() >= CACHE_LIMIT {
                debug!("Stemmer cache reached {} entries, clearing", CACHE_LIMIT);
                cache.clear();
            }
            cache.insert(word.to_string(), root.clone());
        }
        root
    }

    fn is_plural(&self, word: &str) -> bool {
        if let Some(caps) = self.plural_suffix.captures(word) {
            return cap(&caps, 1).contains('-');
        }
        word.contains('-')
    }

    fn stem_plural_word(&self, plural: &str) -> String {
        let Some(caps) = self.plural_split.captures(plural) else {
            return plural.to_string();
        };
        let mut first = cap(&caps, 1).to_string();
        let mut second = cap(&caps, 2).to_string();

        // malaikat-malaikat-nya -> malaikat + malaikat-nya
        if POSSESSIVE_AND_PARTICLE_SUFFIXES.contains(&second.as_str()) {
            if let Some(inner) = self.plural_split.captures(&first) {
                let (head, tail) = (cap(&inner, 1).to_string(), cap(&inner, 2).to_string());
                second = format!("{}-{}", tail, second);
                first = head;
            }
        }

        let root_first = self.stem_singular_word(&first);
        let mut root_second = self.stem_singular_word(&second);

        // meniru-nirukan -> tiru
        if !self.dictionary.contains(&second) && root_second == second {
            root_second = self.stem_singular_word(&format!("me{}", second));
        }

        if root_first == root_second {
            root_first
        } else {
            plural.to_string()
        }
    }

    fn stem_singular_word(&self, word: &str) -> String {
        let mut context = StemContext {
            stemmer: self,
            original: word.to_string(),
            current: word.to_string(),
            removals: Vec::new(),
        };
        context.run();

        if self.dictionary.contains(&context.current) {
            context.current
        } else {
            context.original
        }
    }

    fn satisfies_precedence(&self, word: &str) -> bool {
        self.precedence.iter().any(|p| p.is_match(word))
    }
}

impl Stemmer for IndonesianStemmer {
    fn stem(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let cleaned = self.text_cleanup.replace_all(&lowered, " ");
        cleaned
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(|w| self.stem_word(w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn name(&self) -> &str {
        "indonesian-ecs"
    }
}

#[derive(Clone, Copy)]
enum Step {
    Particle,
    Possessive,
    DerivationalSuffix,
    PlainPrefix,
    Disambiguate(usize),
}

struct StemContext<'a> {
    stemmer: &'a IndonesianStemmer,
    original: String,
    current: String,
    removals: Vec<Removal>,
}

impl StemContext<'_> {
    fn in_dictionary(&self) -> bool {
        self.stemmer.dictionary.contains(&self.current)
    }

    fn run(&mut self) {
        if self.in_dictionary() || self.current.chars().count() <= 3 {
            return;
        }

        if self.stemmer.satisfies_precedence(&self.original) {
            self.remove_prefixes();
            if self.in_dictionary() {
                return;
            }
            self.remove_suffixes();
            if self.in_dictionary() {
                return;
            }
            self.current = self.original.clone();
            self.removals.clear();
        }

        self.remove_suffixes();
        if self.in_dictionary() {
            return;
        }

        self.remove_prefixes();
        if self.in_dictionary() {
            return;
        }

        self.restore_suffixes_loop();
    }

    fn remove_suffixes(&mut self) {
        for step in [Step::Particle, Step::Possessive, Step::DerivationalSuffix] {
            self.visit(step);
            if self.in_dictionary() {
                return;
            }
        }
    }

    fn remove_prefixes(&mut self) {
        for _ in 0..3 {
            self.prefix_pass();
            if self.in_dictionary() {
                return;
            }
        }
    }

    /// Runs prefix steps until one of them strips something
    fn prefix_pass(&mut self) {
        let removal_count = self.removals.len();
        let steps = std::iter::once(Step::PlainPrefix)
            .chain((0..self.stemmer.prefix_groups.len()).map(Step::Disambiguate));

        for step in steps {
            self.visit(step);
            if self.in_dictionary() || self.removals.len() > removal_count {
                return;
            }
        }
    }

    fn visit(&mut self, step: Step) {
        let stemmer = self.stemmer;
        let (candidate, kind) = match step {
            Step::Particle => (
                stemmer.particle.replacen(&self.current, 1, "").into_owned(),
                AffixKind::Particle,
            ),
            Step::Possessive => (
                stemmer.possessive.replacen(&self.current, 1, "").into_owned(),
                AffixKind::Possessive,
            ),
            Step::DerivationalSuffix => (
                stemmer.derivational_suffix.replacen(&self.current, 1, "").into_owned(),
                AffixKind::DerivationalSuffix,
            ),
            Step::PlainPrefix => (
                stemmer.plain_prefix.replacen(&self.current, 1, "").into_owned(),
                AffixKind::DerivationalPrefix,
            ),
            Step::Disambiguate(group) => {
                let mut result = None;
                for rule in &stemmer.prefix_groups[group] {
                    result = rule.apply(&self.current);
                    if let Some(candidate) = &result {
                        if stemmer.dictionary.contains(candidate) {
                            debug!("Prefix rule {} matched root '{}'", rule.name, candidate);
                            break;
                        }
                    }
                }
                match result {
                    Some(candidate) => (candidate, AffixKind::DerivationalPrefix),
                    None => return,
                }
            }
        };

        if candidate != self.current {
            let removed = self.current.replacen(candidate.as_str(), "", 1);
            self.removals.push(Removal {
                subject: self.current.clone(),
                result: candidate.clone(),
                removed,
                kind,
            });
            self.current = candidate;
        }
    }

    /// Re-attach removed suffixes one by one and retry prefix removal
    fn restore_suffixes_loop(&mut self) {
        self.restore_prefix();

        let snapshot = self.removals.clone();
        let word_before = self.current.clone();

        for removal in snapshot.iter().rev().filter(|r| r.kind.is_suffix()) {
            if removal.removed == "kan" {
                self.current = format!("{}k", removal.result);
                self.remove_prefixes();
                if self.in_dictionary() {
                    return;
                }
                self.current = format!("{}kan", removal.result);
            } else {
                self.current = removal.subject.clone();
            }

            self.remove_prefixes();
            if self.in_dictionary() {
                return;
            }

            self.removals = snapshot.clone();
            self.current = word_before.clone();
        }
    }

    fn restore_prefix(&mut self) {
        if let Some(first_prefix) = self
            .removals
            .iter()
            .find(|r| r.kind == AffixKind::DerivationalPrefix)
        {
            self.current = first_prefix.subject.clone();
        }
        self.removals.retain(|r| r.kind != AffixKind::DerivationalPrefix);
    }
}
