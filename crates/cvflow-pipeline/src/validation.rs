//! Workflow validation: lint rules and diagnostics.
//!
//! Checks the structural guarantees the scheduler relies on: a single entry,
//! an acyclic graph, fan-out branches that write disjoint fields, and joins
//! that close exactly one fan-out. Call [`validate`] for all diagnostics or
//! [`validate_or_raise`] to fail on the first `Error`-severity issue.

use std::collections::{BTreeSet, HashSet, VecDeque};

use cvflow_types::{CvflowError, StepId};

use crate::graph::Workflow;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub step: Option<StepId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "[{level}] {}: {}", self.rule, self.message)
    }
}

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, workflow: &Workflow) -> Vec<Diagnostic>;
}

fn error(rule: &dyn LintRule, step: Option<StepId>, message: String) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity: Severity::Error,
        message,
        step,
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct EntryStepRule;
impl LintRule for EntryStepRule {
    fn name(&self) -> &str { "entry_step" }
    fn apply(&self, wf: &Workflow) -> Vec<Diagnostic> {
        let entry = wf.entry();
        let mut out = Vec::new();
        if !wf.contains(entry) {
            out.push(error(self, Some(entry), format!("Entry step '{entry}' has no router")));
        }
        if !wf.predecessors(entry).is_empty() {
            out.push(error(self, Some(entry), format!("Entry step '{entry}' has incoming edges")));
        }
        out
    }
}

struct RouterPresentRule;
impl LintRule for RouterPresentRule {
    fn name(&self) -> &str { "router_present" }
    fn apply(&self, wf: &Workflow) -> Vec<Diagnostic> {
        let mut missing = BTreeSet::new();
        for edge in wf.edges() {
            for step in [edge.from, edge.to] {
                if !wf.contains(step) {
                    missing.insert(step);
                }
            }
        }
        missing
            .into_iter()
            .map(|step| error(self, Some(step), format!("Step '{step}' is referenced by an edge but has no router")))
            .collect()
    }
}

struct ErrorStepRule;
impl LintRule for ErrorStepRule {
    fn name(&self) -> &str { "error_step" }
    fn apply(&self, wf: &Workflow) -> Vec<Diagnostic> {
        let step = wf.error_step();
        let mut out = Vec::new();
        if !wf.contains(step) {
            out.push(error(self, Some(step), format!("Error step '{step}' has no router")));
        }
        if !wf.successors(step).is_empty() {
            out.push(error(self, Some(step), format!("Error step '{step}' must be terminal")));
        }
        if !wf.predecessors(step).is_empty() {
            out.push(error(
                self,
                Some(step),
                format!("Error step '{step}' is entered implicitly and must not have declared edges"),
            ));
        }
        out
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str { "reachability" }
    fn apply(&self, wf: &Workflow) -> Vec<Diagnostic> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([wf.entry()]);
        while let Some(step) = queue.pop_front() {
            if visited.insert(step) {
                queue.extend(wf.successors(step));
            }
        }
        wf.steps()
            .filter(|s| *s != wf.error_step() && !visited.contains(s))
            .map(|step| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Step '{step}' is not reachable from the entry step"),
                step: Some(step),
            })
            .collect()
    }
}

struct AcyclicRule;
impl LintRule for AcyclicRule {
    fn name(&self) -> &str { "acyclic" }
    fn apply(&self, wf: &Workflow) -> Vec<Diagnostic> {
        // Kahn's algorithm: anything left with incoming edges sits on a cycle.
        let steps: BTreeSet<StepId> = wf
            .edges()
            .iter()
            .flat_map(|e| [e.from, e.to])
            .collect();
        let mut indegree: std::collections::BTreeMap<StepId, usize> =
            steps.iter().map(|s| (*s, wf.predecessors(*s).len())).collect();
        let mut queue: VecDeque<StepId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(s, _)| *s)
            .collect();
        while let Some(step) = queue.pop_front() {
            for next in wf.successors(step) {
                if let Some(d) = indegree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }
        let cyclic: Vec<String> = indegree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(s, _)| s.to_string())
            .collect();
        if cyclic.is_empty() {
            vec![]
        } else {
            vec![error(self, None, format!("Workflow contains a cycle through: {}", cyclic.join(", ")))]
        }
    }
}

struct DisjointBranchesRule;
impl LintRule for DisjointBranchesRule {
    fn name(&self) -> &str { "disjoint_branches" }
    fn apply(&self, wf: &Workflow) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for origin in wf.steps() {
            let branches = wf.successors(origin);
            if branches.len() < 2 {
                continue;
            }
            for (i, a) in branches.iter().enumerate() {
                for b in &branches[i + 1..] {
                    let shared: Vec<_> = a
                        .owned_fields()
                        .iter()
                        .filter(|f| b.owned_fields().contains(f))
                        .map(|f| f.name())
                        .collect();
                    if !shared.is_empty() {
                        out.push(error(
                            self,
                            Some(origin),
                            format!(
                                "Parallel branches '{a}' and '{b}' both write: {}",
                                shared.join(", ")
                            ),
                        ));
                    }
                }
            }
        }
        out
    }
}

struct JoinShapeRule;
impl LintRule for JoinShapeRule {
    fn name(&self) -> &str { "join_shape" }
    fn apply(&self, wf: &Workflow) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for join in wf.steps() {
            let preds = wf.predecessors(join);
            if preds.len() < 2 {
                continue;
            }
            let origins: BTreeSet<Vec<StepId>> =
                preds.iter().map(|p| wf.predecessors(*p)).collect();
            let single_origin = origins.len() == 1
                && origins.iter().next().is_some_and(|o| {
                    o.len() == 1 && preds.iter().all(|p| wf.successors(o[0]).contains(p))
                });
            if !single_origin {
                out.push(error(
                    self,
                    Some(join),
                    format!("Join step '{join}' must close the branches of exactly one fan-out"),
                ));
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn builtin_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(EntryStepRule),
        Box::new(RouterPresentRule),
        Box::new(ErrorStepRule),
        Box::new(ReachabilityRule),
        Box::new(AcyclicRule),
        Box::new(DisjointBranchesRule),
        Box::new(JoinShapeRule),
    ]
}

/// Run every built-in rule and return all diagnostics.
pub fn validate(workflow: &Workflow) -> Vec<Diagnostic> {
    builtin_rules()
        .iter()
        .flat_map(|rule| rule.apply(workflow))
        .collect()
}

/// Validate and fail on the first `Error`-severity diagnostic.
///
/// On success returns the remaining (warning) diagnostics.
pub fn validate_or_raise(workflow: &Workflow) -> cvflow_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(workflow);
    if let Some(err) = diagnostics.iter().find(|d| d.severity == Severity::Error) {
        return Err(CvflowError::WorkflowInvalid(format!(
            "[{}] {}",
            err.rule, err.message
        )));
    }
    Ok(diagnostics)
}
