//! Objective functions and the comparison order they impose on solutions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    pub fn is_maximizing(self) -> bool {
        self == Self::Maximize
    }

    /// Strict improvement of `a` over `b`. NaN never improves anything.
    pub fn is_better(self, a: f64, b: f64) -> bool {
        match self {
            Self::Maximize => a > b,
            Self::Minimize => a < b,
        }
    }

    pub fn is_better_or_equal(self, a: f64, b: f64) -> bool {
        match self {
            Self::Maximize => a >= b,
            Self::Minimize => a <= b,
        }
    }

    /// A value every real score improves upon.
    pub fn worst_value(self) -> f64 {
        match self {
            Self::Maximize => f64::NEG_INFINITY,
            Self::Minimize => f64::INFINITY,
        }
    }

    /// Orders `a` before `b` when `a` is better. NaN sorts last.
    pub fn compare(self, a: f64, b: f64) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let natural = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
                match self {
                    Self::Minimize => natural,
                    Self::Maximize => natural.reverse(),
                }
            }
        }
    }

    /// Best of a set of scores, `None` when empty.
    pub fn best_of<I: IntoIterator<Item = f64>>(self, values: I) -> Option<f64> {
        values
            .into_iter()
            .fold(None, |best: Option<f64>, value| match best {
                Some(current) if !self.is_better(value, current) => Some(current),
                _ => Some(value),
            })
    }
}

impl fmt::Display for ObjectiveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maximize => write!(f, "maximize"),
            Self::Minimize => write!(f, "minimize"),
        }
    }
}

type SolutionEvaluator<S> = Arc<dyn Fn(&S) -> f64 + Send + Sync>;
type MoveEvaluator<M> = Arc<dyn Fn(&M) -> f64 + Send + Sync>;

/// A named objective: a direction, a full-solution evaluator and an optional
/// incremental move evaluator.
pub struct Objective<S, M = ()> {
    name: String,
    direction: ObjectiveDirection,
    eval_solution: SolutionEvaluator<S>,
    eval_move: Option<MoveEvaluator<M>>,
}

impl<S, M> Clone for Objective<S, M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            direction: self.direction,
            eval_solution: Arc::clone(&self.eval_solution),
            eval_move: self.eval_move.clone(),
        }
    }
}

impl<S, M> fmt::Debug for Objective<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Objective")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("incremental", &self.eval_move.is_some())
            .finish()
    }
}

impl<S, M> Objective<S, M> {
    pub fn of(
        name: impl Into<String>,
        direction: ObjectiveDirection,
        eval_solution: impl Fn(&S) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            eval_solution: Arc::new(eval_solution),
            eval_move: None,
        }
    }

    pub fn of_minimizing(
        name: impl Into<String>,
        eval_solution: impl Fn(&S) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self::of(name, ObjectiveDirection::Minimize, eval_solution)
    }

    pub fn of_maximizing(
        name: impl Into<String>,
        eval_solution: impl Fn(&S) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self::of(name, ObjectiveDirection::Maximize, eval_solution)
    }

    /// Attach an incremental evaluator returning the score delta of a move.
    pub fn with_move_evaluator(
        mut self,
        eval_move: impl Fn(&M) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.eval_move = Some(Arc::new(eval_move));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    pub fn evaluate(&self, solution: &S) -> f64 {
        (self.eval_solution)(solution)
    }

    /// Delta of applying `mv`, `None` when the domain only scores full solutions.
    pub fn evaluate_move(&self, mv: &M) -> Option<f64> {
        self.eval_move.as_ref().map(|eval| eval(mv))
    }

    pub fn is_better(&self, a: &S, b: &S) -> bool {
        self.direction.is_better(self.evaluate(a), self.evaluate(b))
    }

    pub fn compare(&self, a: &S, b: &S) -> Ordering {
        self.direction.compare(self.evaluate(a), self.evaluate(b))
    }

    /// Best solution of the iterator; the first one wins on ties.
    pub fn best<'a, I>(&self, solutions: I) -> Option<&'a S>
    where
        I: IntoIterator<Item = &'a S>,
        S: 'a,
    {
        let mut best: Option<(&'a S, f64)> = None;
        for solution in solutions {
            let score = self.evaluate(solution);
            match best {
                Some((_, current)) if !self.direction.is_better(score, current) => {}
                _ => best = Some((solution, score)),
            }
        }
        best.map(|(solution, _)| solution)
    }
}

/// Outcome of comparing two solutions under several objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dominance {
    Dominates,
    Dominated,
    NonDominated,
    Equal,
}

/// Several objectives composed either lexicographically or by Pareto dominance.
#[derive(Debug, Clone)]
pub struct ObjectiveSet<S, M = ()> {
    objectives: Vec<Objective<S, M>>,
}

impl<S, M> ObjectiveSet<S, M> {
    pub fn new(objectives: Vec<Objective<S, M>>) -> Self {
        Self { objectives }
    }

    pub fn objectives(&self) -> &[Objective<S, M>] {
        &self.objectives
    }

    /// First objective decides; later ones only break ties.
    pub fn compare_lexicographic(&self, a: &S, b: &S) -> Ordering {
        for objective in &self.objectives {
            let ordering = objective.compare(a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    pub fn dominance(&self, a: &S, b: &S) -> Dominance {
        let mut a_better = false;
        let mut b_better = false;
        for objective in &self.objectives {
            let (va, vb) = (objective.evaluate(a), objective.evaluate(b));
            if objective.direction().is_better(va, vb) {
                a_better = true;
            } else if objective.direction().is_better(vb, va) {
                b_better = true;
            }
        }
        match (a_better, b_better) {
            (true, false) => Dominance::Dominates,
            (false, true) => Dominance::Dominated,
            (true, true) => Dominance::NonDominated,
            (false, false) => Dominance::Equal,
        }
    }
}
