//! Image reference parsing, normalization and digest pinning.
//!
//! References are normalized the way the Docker CLI does it: a bare name such
//! as `nginx` lives under `docker.io/library/`, and [`ImageReference`]'s
//! `Display` renders the short ("familiar") form back, so `nginx:latest`
//! pinned to a digest prints as `nginx:latest@sha256:…`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ReferenceError;

pub const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const NAME_TOTAL_LENGTH_MAX: usize = 255;

/// Separator between a name (and tag) and its content digest.
pub const DIGEST_DELIMITER: char = '@';

/// A grammar rule compiled on first use.
///
/// Input never matches a rule that fails to compile, so a bad rule rejects
/// references instead of panicking.
struct Pattern {
    source: &'static str,
    compiled: OnceLock<Option<Regex>>,
}

impl Pattern {
    const fn new(source: &'static str) -> Self {
        Self {
            source,
            compiled: OnceLock::new(),
        }
    }

    fn regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| Regex::new(self.source).ok())
            .as_ref()
    }

    fn is_match(&self, input: &str) -> bool {
        self.regex().is_some_and(|re| re.is_match(input))
    }
}

static PATH_COMPONENT: Pattern = Pattern::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$");
static DOMAIN: Pattern = Pattern::new(
    r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$",
);
static TAG: Pattern = Pattern::new(r"^[\w][\w.-]{0,127}$");
static DIGEST_FORMAT: Pattern = Pattern::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]{32,}$");
static IDENTIFIER: Pattern = Pattern::new(r"^[a-f0-9]{64}$");

/// Drop everything from the first digest delimiter on.
///
/// `foo:latest@sha256:abc` becomes `foo:latest`; references without a digest
/// are returned unchanged.
pub fn strip_digest(reference: &str) -> &str {
    match reference.split_once(DIGEST_DELIMITER) {
        Some((name, _)) => name,
        None => reference,
    }
}

/// A parsed, normalized image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse `input` and normalize it onto the default registry when no
    /// registry domain is given.
    pub fn parse_normalized(input: &str) -> Result<Self, ReferenceError> {
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if IDENTIFIER.is_match(input) {
            return Err(ReferenceError::invalid(
                input,
                "cannot specify 64-byte hexadecimal strings",
            ));
        }

        let (remainder, digest) = match input.split_once(DIGEST_DELIMITER) {
            Some((name, digest)) => (name, Some(digest)),
            None => (input, None),
        };
        let (name, tag) = split_tag(remainder);
        let (domain, path) = split_domain(name);

        if path.is_empty() {
            return Err(ReferenceError::invalid(input, "missing repository name"));
        }
        if path.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ReferenceError::invalid(
                input,
                "repository name must be lowercase",
            ));
        }
        if !path.split('/').all(|part| PATH_COMPONENT.is_match(part)) {
            return Err(ReferenceError::invalid(input, "invalid repository name"));
        }
        if !DOMAIN.is_match(&domain) {
            return Err(ReferenceError::invalid(input, "invalid registry domain"));
        }
        if domain.len() + 1 + path.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(ReferenceError::invalid(input, "repository name too long"));
        }
        if let Some(tag) = tag {
            if !TAG.is_match(tag) {
                return Err(ReferenceError::invalid(input, "invalid tag"));
            }
        }
        if let Some(digest) = digest {
            if !is_valid_digest(digest) {
                return Err(ReferenceError::invalid(input, "invalid digest"));
            }
        }

        Ok(Self {
            domain,
            path,
            tag: tag.map(str::to_owned),
            digest: digest.map(str::to_owned),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// A reference is canonical once it carries a content digest.
    pub fn is_canonical(&self) -> bool {
        self.digest.is_some()
    }

    /// Fully-qualified repository name, e.g. `docker.io/library/nginx`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Short repository name, e.g. `nginx` or `ghcr.io/acme/api`.
    pub fn familiar_name(&self) -> String {
        if self.domain != DEFAULT_DOMAIN {
            return self.name();
        }
        match self.path.strip_prefix(OFFICIAL_REPO_PREFIX) {
            Some(short) if !short.contains('/') => short.to_string(),
            _ => self.path.clone(),
        }
    }

    /// Pin this reference to `digest`, keeping the tag.
    pub fn with_digest(&self, digest: &str) -> Result<Self, ReferenceError> {
        if !is_valid_digest(digest) {
            return Err(ReferenceError::InvalidDigest {
                digest: digest.to_string(),
            });
        }
        Ok(Self {
            digest: Some(digest.to_string()),
            ..self.clone()
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.familiar_name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "{DIGEST_DELIMITER}{digest}")?;
        }
        Ok(())
    }
}

fn is_valid_digest(digest: &str) -> bool {
    if !DIGEST_FORMAT.is_match(digest) {
        return false;
    }
    match digest.split_once(':') {
        Some(("sha256", hex)) => {
            hex.len() == 64 && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
        }
        Some(("sha512", hex)) => {
            hex.len() == 128 && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
        }
        _ => true,
    }
}

// The tag separator is the last ':' after the last '/', so registry ports
// (`localhost:5000/foo`) are not mistaken for tags.
fn split_tag(name: &str) -> (&str, Option<&str>) {
    let start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[start..].rfind(':') {
        Some(i) => (&name[..start + i], Some(&name[start + i + 1..])),
        None => (name, None),
    }
}

fn split_domain(name: &str) -> (String, String) {
    let (mut domain, mut path) = match name.split_once('/') {
        Some((first, rest)) if looks_like_domain(first) => (first.to_string(), rest.to_string()),
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };
    if domain == LEGACY_DEFAULT_DOMAIN {
        domain = DEFAULT_DOMAIN.to_string();
    }
    if domain == DEFAULT_DOMAIN && !path.contains('/') {
        path = format!("{OFFICIAL_REPO_PREFIX}{path}");
    }
    (domain, path)
}

fn looks_like_domain(first: &str) -> bool {
    first.contains('.')
        || first.contains(':')
        || first == "localhost"
        || first.chars().any(|c| c.is_ascii_uppercase())
}
