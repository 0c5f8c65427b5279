//! Fix dispatcher
//!
//! Runs the fix chain for one file. Fixes are strictly sequential: each fix
//! function receives the content produced by the previous one, so a rename
//! made early in the chain is visible to the formatting passes after it.

use crate::diff::unified_diff;
use crate::model::{FixOutcome, Unhandled, UnhandledReason, Violation};
use crate::patch;
use crate::registry::{FixContext, FixError, ProposedFix, RuleEntry, RuleRegistry};
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Result of one chain run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainResult {
    pub final_content: String,
    /// In chain order. "No change" invocations leave no entry.
    pub outcomes: Vec<FixOutcome>,
    pub unhandled: Vec<Unhandled>,
}

impl ChainResult {
    pub fn changed_from(&self, original: &str) -> bool {
        self.final_content != original
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.applied).count()
    }

    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_error()).count()
    }
}

/// Read-only fix dispatcher, shareable across workers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<RuleRegistry>,
    enabled: Arc<BTreeSet<String>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RuleRegistry>, enabled: BTreeSet<String>) -> Self {
        Self {
            registry,
            enabled: Arc::new(enabled),
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn enabled(&self) -> &BTreeSet<String> {
        &self.enabled
    }

    /// Run every applicable fix over `content`. `label` names the file in diffs.
    pub fn run_chain(&self, label: &str, content: &str, violations: &[Violation]) -> ChainResult {
        let mut unhandled = Vec::new();
        let mut queue: Vec<(usize, &Violation)> = Vec::new();

        for (idx, violation) in violations.iter().enumerate() {
            let line = violation.location.line;
            if !self.registry.contains(&violation.rule_id) {
                unhandled.push(Unhandled {
                    rule_id: violation.rule_id.clone(),
                    line,
                    reason: UnhandledReason::UnknownRule,
                });
            } else if !self.enabled.contains(&violation.rule_id) {
                unhandled.push(Unhandled {
                    rule_id: violation.rule_id.clone(),
                    line,
                    reason: UnhandledReason::Disabled,
                });
            } else {
                queue.push((idx, violation));
            }
        }

        queue.sort_by_key(|(idx, v)| (self.registry.chain_rank(&v.rule_id), *idx));

        let mut current = content.to_string();
        let mut outcomes = Vec::new();

        for (_, violation) in queue {
            let Some(entry) = self.registry.get(&violation.rule_id) else {
                continue;
            };
            let ctx = FixContext::new(&current, violation);
            let proposal = match propose_contained(entry, &ctx) {
                Ok(Some(p)) if !p.edits.is_empty() => p,
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(
                        file = label,
                        rule_id = %violation.rule_id,
                        error = %err,
                        "fix function failed; continuing with last good content"
                    );
                    outcomes.push(failed_outcome(violation, &current, err.to_string()));
                    continue;
                }
            };

            let patched = match patch::apply(&current, &proposal.edits) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(
                        file = label,
                        rule_id = %violation.rule_id,
                        error = %err,
                        "fix proposed an invalid edit"
                    );
                    outcomes.push(failed_outcome(
                        violation,
                        &current,
                        format!("fix produced an unusable edit: {}", err),
                    ));
                    continue;
                }
            };

            if !patched.changed_from(&current) {
                continue;
            }

            if !patched.skipped.is_empty() {
                tracing::info!(
                    file = label,
                    rule_id = %violation.rule_id,
                    skipped = patched.skipped.len(),
                    "dropped overlapping edits"
                );
            }

            let diff = unified_diff(label, &current, &patched.content).to_string();
            tracing::debug!(file = label, rule_id = %violation.rule_id, "fix applied");
            outcomes.push(FixOutcome {
                rule_id: violation.rule_id.clone(),
                line: violation.location.line,
                applied: true,
                rejected: false,
                description: proposal.description,
                content_before: std::mem::replace(&mut current, patched.content.clone()),
                content_after: patched.content,
                unified_diff: diff,
                skipped_edits: patched.skipped,
                error: None,
                score: None,
            });
        }

        ChainResult {
            final_content: current,
            outcomes,
            unhandled,
        }
    }
}

/// Call the fix function, turning a panic into an ordinary fix error so the
/// chain can carry on with the content it had.
fn propose_contained(
    entry: &RuleEntry,
    ctx: &FixContext<'_>,
) -> Result<Option<ProposedFix>, FixError> {
    panic::catch_unwind(AssertUnwindSafe(|| entry.fixer().propose(ctx))).unwrap_or_else(
        |payload| {
            Err(FixError::Failed(format!(
                "fix function panicked: {}",
                panic_message(payload.as_ref())
            )))
        },
    )
}

/// Text of a panic payload, for messages.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn failed_outcome(violation: &Violation, current: &str, error: String) -> FixOutcome {
    FixOutcome {
        rule_id: violation.rule_id.clone(),
        line: violation.location.line,
        applied: false,
        rejected: false,
        description: String::new(),
        content_before: current.to_string(),
        content_after: current.to_string(),
        unified_diff: String::new(),
        skipped_edits: Vec::new(),
        error: Some(error),
        score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edit, Location, Severity};
    use crate::registry::{FixError, ProposedFix, RuleSpec};

    fn violation(rule: &str, line: usize) -> Violation {
        Violation::new(rule, Severity::Warning, Location::at(line, 1))
    }

    /// Replaces every occurrence of `from` with `to`.
    fn literal_rule(id: &str, from: &'static str, to: &'static str) -> RuleSpec {
        RuleSpec::from_fn(id, move |ctx| {
            let edits: Vec<Edit> = ctx
                .content()
                .match_indices(from)
                .map(|(i, _)| Edit::replace(i..i + from.len(), to))
                .collect();
            Ok(ProposedFix::non_empty(edits, format!("{} -> {}", from, to)))
        })
    }

    fn dispatcher(registry: RuleRegistry) -> Dispatcher {
        let enabled = registry.default_enabled();
        Dispatcher::new(Arc::new(registry), enabled)
    }

    #[test]
    fn test_later_fix_sees_earlier_output() {
        let registry = RuleRegistry::builder()
            .rule(literal_rule("rename", "gci", "Get-ChildItem"))
            .rule(literal_rule("annotate", "Get-ChildItem", "Get-ChildItem -File"))
            .build()
            .unwrap();
        let d = dispatcher(registry);
        let result = d.run_chain(
            "a.ps1",
            "gci",
            &[violation("annotate", 1), violation("rename", 1)],
        );
        assert_eq!(result.final_content, "Get-ChildItem -File");
        let ids: Vec<&str> = result.outcomes.iter().map(|o| o.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["rename", "annotate"]);
        assert_eq!(result.outcomes[1].content_before, "Get-ChildItem");
    }

    #[test]
    fn test_priority_overrides_registration_order() {
        let registry = RuleRegistry::builder()
            .rule(literal_rule("annotate", "Get-ChildItem", "Get-ChildItem -File"))
            .rule(literal_rule("rename", "gci", "Get-ChildItem").priority(10))
            .build()
            .unwrap();
        let result = dispatcher(registry).run_chain(
            "a.ps1",
            "gci",
            &[violation("annotate", 1), violation("rename", 1)],
        );
        assert_eq!(result.final_content, "Get-ChildItem -File");
    }

    #[test]
    fn test_failing_fix_does_not_abort_chain() {
        let registry = RuleRegistry::builder()
            .rule(RuleSpec::from_fn("boom", |_ctx| {
                Err(FixError::Failed("rule crashed".to_string()))
            }))
            .rule(literal_rule("host", "Write-Host", "Write-Output"))
            .build()
            .unwrap();
        let result = dispatcher(registry).run_chain(
            "a.ps1",
            "Write-Host 'x'",
            &[violation("boom", 1), violation("host", 1)],
        );
        assert_eq!(result.final_content, "Write-Output 'x'");
        assert_eq!(result.outcomes.len(), 2);
        assert!(!result.outcomes[0].applied);
        assert_eq!(result.outcomes[0].error.as_deref(), Some("rule crashed"));
        assert_eq!(result.outcomes[0].content_after, "Write-Host 'x'");
        assert!(result.outcomes[1].applied);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.applied_count(), 1);
    }

    #[test]
    fn test_panicking_fix_does_not_abort_chain() {
        let registry = RuleRegistry::builder()
            .rule(
                RuleSpec::from_fn("crash", |_ctx| panic!("index out of bounds")).priority(100),
            )
            .rule(literal_rule("host", "Write-Host", "Write-Output"))
            .build()
            .unwrap();
        let result = dispatcher(registry).run_chain(
            "a.ps1",
            "Write-Host 'x'",
            &[violation("crash", 1), violation("host", 1)],
        );
        assert_eq!(result.final_content, "Write-Output 'x'");
        assert_eq!(result.outcomes[0].rule_id, "crash");
        let error = result.outcomes[0].error.as_deref().unwrap();
        assert!(error.contains("panicked: index out of bounds"), "{error}");
        assert!(result.outcomes[1].applied);
    }

    #[test]
    fn test_out_of_range_edit_is_recorded_not_applied() {
        let registry = RuleRegistry::builder()
            .rule(RuleSpec::from_fn("wild", |_ctx| {
                Ok(Some(ProposedFix::new(vec![Edit::replace(0..999, "x")], "wild")))
            }))
            .build()
            .unwrap();
        let result = dispatcher(registry).run_chain("a.ps1", "abc", &[violation("wild", 1)]);
        assert_eq!(result.final_content, "abc");
        assert!(result.outcomes[0].error.as_deref().unwrap().contains("unusable edit"));
    }

    #[test]
    fn test_no_change_leaves_no_outcome() {
        let registry = RuleRegistry::builder()
            .rule(literal_rule("host", "Write-Host", "Write-Output"))
            .build()
            .unwrap();
        let result =
            dispatcher(registry).run_chain("a.ps1", "Write-Output 'x'", &[violation("host", 1)]);
        assert!(result.outcomes.is_empty());
        assert!(!result.changed_from("Write-Output 'x'"));
    }

    #[test]
    fn test_unknown_and_disabled_rules_are_reported() {
        let registry = RuleRegistry::builder()
            .rule(literal_rule("host", "Write-Host", "Write-Output").opt_in())
            .build()
            .unwrap();
        let result = dispatcher(registry).run_chain(
            "a.ps1",
            "Write-Host 'x'",
            &[violation("host", 1), violation("nope", 2)],
        );
        assert_eq!(result.final_content, "Write-Host 'x'");
        assert_eq!(result.unhandled.len(), 2);
        assert_eq!(result.unhandled[0].reason, UnhandledReason::Disabled);
        assert_eq!(result.unhandled[1].reason, UnhandledReason::UnknownRule);
        assert_eq!(result.unhandled[1].line, 2);
    }

    #[test]
    fn test_overlapping_edits_are_recorded_on_outcome() {
        let registry = RuleRegistry::builder()
            .rule(RuleSpec::from_fn("double", |_ctx| {
                Ok(Some(ProposedFix::new(
                    vec![Edit::replace(0..4, "AAAA"), Edit::replace(2..6, "BBBB")],
                    "conflicting",
                )))
            }))
            .build()
            .unwrap();
        let result = dispatcher(registry).run_chain("a.ps1", "abcdefgh", &[violation("double", 1)]);
        assert_eq!(result.final_content, "abBBBBgh");
        assert_eq!(result.outcomes[0].skipped_edits.len(), 1);
    }
}
