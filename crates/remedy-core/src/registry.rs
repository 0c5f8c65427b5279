//! Fix rule registry
//!
//! Built once at startup and never mutated afterwards, so a single
//! `Arc<RuleRegistry>` can be shared read-only by every worker.

use crate::model::{Edit, Violation};
use crate::parser::script::{self, Lexed};
use crate::patch::PatchError;
use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// What a fix function sees: the current content of the file (after every
/// earlier fix in the chain) and the violation that triggered it.
pub struct FixContext<'a> {
    content: &'a str,
    violation: &'a Violation,
    lexed: OnceCell<Lexed>,
}

impl<'a> FixContext<'a> {
    pub fn new(content: &'a str, violation: &'a Violation) -> Self {
        Self {
            content,
            violation,
            lexed: OnceCell::new(),
        }
    }

    pub fn content(&self) -> &'a str {
        self.content
    }

    pub fn violation(&self) -> &'a Violation {
        self.violation
    }

    /// Script span map of the current content, computed on first use.
    pub fn lexed(&self) -> &Lexed {
        self.lexed.get_or_init(|| script::lex(self.content))
    }
}

/// Edits a fix function wants applied to the current content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedFix {
    pub edits: Vec<Edit>,
    pub description: String,
}

impl ProposedFix {
    pub fn new(edits: Vec<Edit>, description: impl Into<String>) -> Self {
        Self {
            edits,
            description: description.into(),
        }
    }

    /// `None` when there is nothing to change.
    pub fn non_empty(edits: Vec<Edit>, description: impl Into<String>) -> Option<Self> {
        if edits.is_empty() {
            None
        } else {
            Some(Self::new(edits, description))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixError {
    #[error("{0}")]
    Failed(String),
    #[error("fix produced an unusable edit: {0}")]
    Patch(#[from] PatchError),
}

/// The fix half of a rule.
pub trait Fixer: Send + Sync {
    /// `Ok(None)` means the content needs no change.
    fn propose(&self, ctx: &FixContext<'_>) -> Result<Option<ProposedFix>, FixError>;
}

/// The detection half of a rule, for rules that ship one.
pub trait Check: Send + Sync {
    fn check(&self, content: &str, lexed: &Lexed) -> Vec<Violation>;
}

struct FnFixer<F>(F);

impl<F> Fixer for FnFixer<F>
where
    F: Fn(&FixContext<'_>) -> Result<Option<ProposedFix>, FixError> + Send + Sync,
{
    fn propose(&self, ctx: &FixContext<'_>) -> Result<Option<ProposedFix>, FixError> {
        (self.0)(ctx)
    }
}

/// Everything needed to register one rule.
pub struct RuleSpec {
    id: String,
    summary: String,
    priority: i32,
    enabled_by_default: bool,
    fixer: Arc<dyn Fixer>,
    check: Option<Arc<dyn Check>>,
}

impl RuleSpec {
    pub fn new(id: impl Into<String>, fixer: Arc<dyn Fixer>) -> Self {
        Self {
            id: id.into(),
            summary: String::new(),
            priority: 0,
            enabled_by_default: true,
            fixer,
            check: None,
        }
    }

    pub fn from_fn<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&FixContext<'_>) -> Result<Option<ProposedFix>, FixError> + Send + Sync + 'static,
    {
        Self::new(id, Arc::new(FnFixer(f)))
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Higher priorities run earlier in a chain.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Exclude the rule from the default enabled set.
    pub fn opt_in(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn check(mut self, check: Arc<dyn Check>) -> Self {
        self.check = Some(check);
        self
    }
}

/// A registered rule.
pub struct RuleEntry {
    pub id: String,
    pub summary: String,
    pub priority: i32,
    pub enabled_by_default: bool,
    /// Position in registration order.
    pub registration: usize,
    fixer: Arc<dyn Fixer>,
    check: Option<Arc<dyn Check>>,
}

impl RuleEntry {
    pub fn fixer(&self) -> &dyn Fixer {
        self.fixer.as_ref()
    }

    pub fn check(&self) -> Option<&dyn Check> {
        self.check.as_deref()
    }
}

impl fmt::Debug for RuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEntry")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("enabled_by_default", &self.enabled_by_default)
            .field("registration", &self.registration)
            .field("has_check", &self.check.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("rule `{0}` is registered more than once")]
    DuplicateRule(String),
    #[error("unknown rule `{0}`")]
    UnknownRule(String),
}

#[derive(Default)]
pub struct RuleRegistryBuilder {
    specs: Vec<RuleSpec>,
}

impl RuleRegistryBuilder {
    pub fn rule(mut self, spec: RuleSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> Result<RuleRegistry, RegistryError> {
        let mut by_id = HashMap::with_capacity(self.specs.len());
        let mut entries = Vec::with_capacity(self.specs.len());
        for (registration, spec) in self.specs.into_iter().enumerate() {
            if by_id.insert(spec.id.clone(), registration).is_some() {
                return Err(RegistryError::DuplicateRule(spec.id));
            }
            entries.push(RuleEntry {
                id: spec.id,
                summary: spec.summary,
                priority: spec.priority,
                enabled_by_default: spec.enabled_by_default,
                registration,
                fixer: spec.fixer,
                check: spec.check,
            });
        }
        Ok(RuleRegistry { entries, by_id })
    }
}

#[derive(Debug)]
pub struct RuleRegistry {
    entries: Vec<RuleEntry>,
    by_id: HashMap<String, usize>,
}

impl RuleRegistry {
    pub fn builder() -> RuleRegistryBuilder {
        RuleRegistryBuilder::default()
    }

    pub fn get(&self, id: &str) -> Option<&RuleEntry> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in chain order: priority descending, then registration order.
    pub fn in_chain_order(&self) -> Vec<&RuleEntry> {
        let mut ordered: Vec<&RuleEntry> = self.entries.iter().collect();
        ordered.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.registration.cmp(&b.registration))
        });
        ordered
    }

    /// Sort key placing `id` in chain order; unknown ids sort last.
    pub fn chain_rank(&self, id: &str) -> (i64, usize) {
        match self.get(id) {
            Some(e) => (-(e.priority as i64), e.registration),
            None => (i64::MAX, usize::MAX),
        }
    }

    pub fn default_enabled(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|e| e.enabled_by_default)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Resolve the enabled set: an explicit list replaces the defaults, then
    /// `disable` is subtracted. Every id must be registered.
    pub fn resolve_enabled(
        &self,
        enable: Option<&[String]>,
        disable: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        let mut enabled = match enable {
            Some(ids) => {
                let mut set = BTreeSet::new();
                for id in ids {
                    set.insert(self.known(id)?.to_string());
                }
                set
            }
            None => self.default_enabled(),
        };
        for id in disable {
            enabled.remove(self.known(id)?);
        }
        Ok(enabled)
    }

    fn known<'s>(&self, id: &'s str) -> Result<&'s str, RegistryError> {
        if self.contains(id) {
            Ok(id)
        } else {
            Err(RegistryError::UnknownRule(id.to_string()))
        }
    }
}
