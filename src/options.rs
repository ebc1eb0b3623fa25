//! Build option resolution.
//!
//! A formula declares the toggles it understands (`--with-foo`, `--without-bar`) and the
//! user requests some set of toggles at install time. [`BuildOptions`] reconciles the two:
//! which requested toggles are used, which declared toggles were left at their default,
//! and which requested toggles the formula never declared.
//!
//! Invalid options are reported as data so the caller decides whether they are fatal.

use std::collections::HashSet;

/// Normalize an option to its `--flag` form
pub fn normalize_flag(option: &str) -> String {
    let trimmed = option.trim();
    if trimmed.starts_with("--") {
        trimmed.to_string()
    } else {
        format!("--{}", trimmed)
    }
}

/// An ordered, de-duplicated list of option flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    flags: Vec<String>,
}

impl Options {
    pub fn new<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let flags = options
            .into_iter()
            .map(|o| normalize_flag(o.as_ref()))
            .filter(|flag| flag.len() > 2 && seen.insert(flag.clone()))
            .collect();
        Self { flags }
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.flags.clone()
    }

    /// Flags in `self` that are also in `other`, in `self`'s order
    fn intersection(&self, other: &Options) -> Vec<String> {
        self.flags
            .iter()
            .filter(|f| other.contains(f))
            .cloned()
            .collect()
    }

    /// Flags in `self` that are not in `other`, in `self`'s order
    fn difference(&self, other: &Options) -> Vec<String> {
        self.flags
            .iter()
            .filter(|f| !other.contains(f))
            .cloned()
            .collect()
    }
}

/// Requested options resolved against a formula's declared options
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    args: Options,
    declared: Options,
}

impl BuildOptions {
    pub fn new(args: Options, declared: Options) -> Self {
        Self { args, declared }
    }

    /// Convenience constructor from raw option strings
    pub fn from_strs<A, D, S, T>(args: A, declared: D) -> Self
    where
        A: IntoIterator<Item = S>,
        D: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self::new(Options::new(args), Options::new(declared))
    }

    pub fn args(&self) -> &Options {
        &self.args
    }

    pub fn declared(&self) -> &Options {
        &self.declared
    }

    /// True when `--{name}` was requested. `name` is the unprefixed option name.
    pub fn include(&self, name: &str) -> bool {
        self.args.contains(&format!("--{}", name))
    }

    fn option_defined(&self, name: &str) -> bool {
        self.declared.contains(&format!("--{}", name))
    }

    /// Effective polarity of the `name` toggle.
    ///
    /// A declared `--with-X` is off unless requested; a declared `--without-X` is on unless
    /// `--without-X` is requested. Undeclared toggles are off.
    pub fn with(&self, name: &str) -> bool {
        let with = format!("with-{}", name);
        let without = format!("without-{}", name);

        if self.option_defined(&with) {
            self.include(&with)
        } else if self.option_defined(&without) {
            !self.include(&without)
        } else {
            false
        }
    }

    pub fn without(&self, name: &str) -> bool {
        !self.with(name)
    }

    /// Declared options that were requested, in declared order
    pub fn used_options(&self) -> Vec<String> {
        self.declared.intersection(&self.args)
    }

    /// Declared options that were not requested
    pub fn unused_options(&self) -> Vec<String> {
        self.declared.difference(&self.args)
    }

    /// Requested options the formula never declared, in request order
    pub fn invalid_options(&self) -> Vec<String> {
        self.args.difference(&self.declared)
    }

    pub fn invalid_option_names(&self) -> Vec<String> {
        let mut names = self.invalid_options();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> BuildOptions {
        BuildOptions::from_strs(
            ["--with-foo", "--with-bar", "--without-qux"],
            ["--with-foo", "--with-bar", "--without-baz", "--without-qux"],
        )
    }

    #[test]
    fn test_include() {
        let b = build();
        assert!(b.include("with-foo"));
        assert!(!b.include("with-qux"));
        assert!(b.include("without-qux"));
        // Prefixed queries never match
        assert!(!b.include("--with-foo"));
    }

    #[test]
    fn test_with_and_without() {
        let b = build();
        assert!(b.with("foo"));
        assert!(b.with("bar"));
        assert!(b.with("baz"));
        assert!(b.without("qux"));
        assert!(b.without("undeclared"));
    }

    #[test]
    fn test_declared_with_option_defaults_off() {
        let b = BuildOptions::from_strs(Vec::<&str>::new(), ["--with-docs"]);
        assert!(!b.with("docs"));
        assert!(b.without("docs"));
    }

    #[test]
    fn test_used_and_unused() {
        let b = build();
        assert_eq!(b.used_options(), vec!["--with-foo", "--with-bar", "--without-qux"]);
        assert_eq!(b.unused_options(), vec!["--without-baz"]);
        assert!(b.invalid_options().is_empty());
    }

    #[test]
    fn test_invalid_option_names_sorted() {
        let b = BuildOptions::from_strs(
            ["--with-foo", "--with-bar", "--without-bas", "--without-abc"],
            ["--with-foo", "--with-bar", "--without-baz", "--without-qux"],
        );
        assert_eq!(b.invalid_options(), vec!["--without-bas", "--without-abc"]);
        assert_eq!(b.invalid_option_names(), vec!["--without-abc", "--without-bas"]);
    }

    #[test]
    fn test_unprefixed_input_is_normalized() {
        let b = BuildOptions::from_strs(["with-foo"], ["--with-foo"]);
        assert!(b.include("with-foo"));
        assert_eq!(b.used_options(), vec!["--with-foo"]);
    }

    #[test]
    fn test_options_dedup_and_skip_empty() {
        let opts = Options::new(["--a", "a", "", "--"]);
        assert_eq!(opts.to_vec(), vec!["--a"]);
    }
}
