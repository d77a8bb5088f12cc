//! The worklist fixed-point engine. Seeds every equivalence class with an
//! initial estimate, propagates estimates across the subtype constraints
//! until nothing changes anymore, then picks one concrete type per class and
//! derives which casts have become redundant.

use std::collections::{HashMap, VecDeque};

use anyhow::{bail, Result};
use log::{debug, error, info};

use crate::constraints::{CompilationUnitId, VariableIndex, VariableKind};
use crate::hierarchy::{TypeId, TypeUniverse};
use crate::model::ConstraintModel;
use crate::solver::type_set::{ChoicePolicy, TypeContext, TypeSet};

/// Knobs for one solver run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverOptions {
    /// How a final estimate with several candidates is collapsed to one.
    pub choice_policy: ChoicePolicy,
    /// Seed independent type variables from their declared bounds instead
    /// of the universe. Off by default; recursive bounds make this unsound
    /// in general, so callers opt in.
    pub seed_independent_from_bounds: bool,
}

/// What the solver hands back to the rewriting collaborator: for each
/// compilation unit, the element variables whose declaration should gain a
/// type argument and the cast variables whose cast has become redundant.
/// The solver never touches source text itself.
pub struct InferenceResults {
    model: ConstraintModel,
    /// Element variables needing a declaration rewrite, per unit.
    pub declarations_to_update: HashMap<CompilationUnitId, Vec<VariableIndex>>,
    /// Cast variables whose cast is now redundant, per unit.
    pub casts_to_remove: HashMap<CompilationUnitId, Vec<VariableIndex>>,
}

impl InferenceResults {
    /// The solved model, for inspecting variables and their chosen types.
    pub fn model(&self) -> &ConstraintModel {
        &self.model
    }

    /// The concrete type selected for `v`, if its estimate pinned one down.
    pub fn chosen_type(&self, v: VariableIndex) -> Option<TypeId> {
        self.model.variable(v).chosen_type
    }

    /// Convenience lookup of a chosen type by variable label.
    pub fn chosen_type_by_name(&self, name: &str) -> Option<TypeId> {
        self.model
            .variable_named(name)
            .and_then(|v| self.chosen_type(v))
    }
}

/// Solves one constraint model over one type universe. Built for exactly one
/// run; [ConstraintSolver::solve_constraints] consumes the solver.
pub struct ConstraintSolver<'u> {
    model: ConstraintModel,
    ctx: TypeContext<'u>,
    options: SolverOptions,
    work_list: VecDeque<VariableIndex>,
}

impl<'u> ConstraintSolver<'u> {
    /// Creates a solver over the given model and universe.
    pub fn new(
        model: ConstraintModel,
        universe: &'u TypeUniverse,
        options: SolverOptions,
    ) -> ConstraintSolver<'u> {
        ConstraintSolver {
            model,
            ctx: TypeContext::new(universe),
            options,
            work_list: VecDeque::new(),
        }
    }

    /// Runs the whole pipeline: structure discovery, element unification,
    /// estimate seeding, fixed-point propagation, type selection, and cast
    /// pruning. An empty intersection during propagation aborts the run;
    /// that indicates contradictory constraints, which is a defect in
    /// constraint construction, not recoverable input.
    pub fn solve_constraints(mut self) -> Result<InferenceResults> {
        info!(
            "solving {} constraints over {} variables",
            self.model.constraints().len(),
            self.model.len()
        );

        let created = self.model.derive_element_variables(self.ctx.universe());
        debug!(
            "structure discovery added {} element slot variables",
            created.len()
        );

        self.unify_element_structures();
        self.initialize_type_estimates();

        let all = self.model.all_variables();
        self.work_list.extend(all);
        self.run_solver()?;

        let declarations_to_update = self.choose_types();
        let casts_to_remove = self.find_casts_to_remove();
        Ok(InferenceResults {
            model: self.model,
            declarations_to_update,
            casts_to_remove,
        })
    }

    /// Propagates element-structure equality through every equivalence
    /// class (pairwise over its members) and through every constraint's two
    /// endpoints, so that aliased parametric types share their element
    /// slots before estimates exist.
    fn unify_element_structures(&mut self) {
        let universe = self.ctx.universe();
        for root in self.model.equivalence_roots() {
            let members = self.model.class_members(root);
            for i in 0..members.len() {
                for j in i + 1..members.len() {
                    self.model
                        .create_element_equals_constraints(universe, members[i], members[j]);
                }
            }
        }
        for cons in self.model.constraints().to_vec() {
            self.model
                .create_element_equals_constraints(universe, cons.lhs, cons.rhs);
        }
    }

    fn initial_estimate(&mut self, v: VariableIndex) -> TypeSet {
        let bounds = match &self.model.variable(v).kind {
            VariableKind::IndependentTypeVariable { bounds } => Some(bounds.clone()),
            _ => None,
        };
        if let Some(bounds) = bounds {
            if self.options.seed_independent_from_bounds && !bounds.is_empty() {
                let mut estimate = TypeSet::Universe;
                for b in bounds {
                    estimate = estimate.intersected_with(&TypeSet::SubTypesOf(b), &mut self.ctx);
                }
                return estimate;
            }
            return TypeSet::Universe;
        }
        match self.model.variable(v).declared_type {
            Some(ty) => TypeSet::Singleton(ty),
            None => TypeSet::Universe,
        }
    }

    /// Seeds every equivalence class with the intersection of its members'
    /// initial estimates.
    fn initialize_type_estimates(&mut self) {
        for root in self.model.equivalence_roots() {
            let members = self.model.class_members(root);
            let mut estimate = TypeSet::Universe;
            for m in members {
                let init = self.initial_estimate(m);
                estimate = estimate.intersected_with(&init, &mut self.ctx);
            }
            if estimate.is_empty() {
                debug!("class of {} seeded empty", self.model.variable(root));
            }
            self.model.set_estimate(root, estimate);
        }
    }

    /// Pops variables whose estimate changed and reprocesses every
    /// constraint referencing them, until quiescence. Terminates because
    /// estimates only shrink within a finite lattice.
    fn run_solver(&mut self) -> Result<()> {
        let mut dequeues = 0usize;
        while let Some(cv) = self.work_list.pop_front() {
            dequeues += 1;
            let used_in = self.model.used_in(cv).to_vec();
            for cons_idx in used_in {
                self.maintain_simple_constraint(cons_idx)?;
            }
        }
        debug!("worklist quiesced after {} dequeues", dequeues);
        Ok(())
    }

    fn estimate_or_universe(&mut self, v: VariableIndex) -> TypeSet {
        match self.model.estimate(v) {
            Some(e) => e,
            None => {
                // no equivalence class estimate means no restriction
                debug!(
                    "variable {} has no type estimate; defaulting to the universe",
                    self.model.variable(v)
                );
                self.model.set_estimate(v, TypeSet::Universe);
                TypeSet::Universe
            }
        }
    }

    /// Propagates one constraint `lhs <= rhs`: the left estimate may only
    /// keep types assignable to something the right side can still be, and
    /// the right estimate may only keep types some remaining left type is
    /// assignable to.
    fn maintain_simple_constraint(&mut self, cons_idx: usize) -> Result<()> {
        let cons = self.model.constraint(cons_idx);
        let left_estimate = self.estimate_or_universe(cons.lhs);
        let right_estimate = self.estimate_or_universe(cons.rhs);

        if left_estimate.is_universe() && right_estimate.is_universe() {
            return Ok(());
        }
        if left_estimate == right_estimate {
            return Ok(());
        }

        let lhs_super_types = left_estimate.super_types(&mut self.ctx);
        let rhs_sub_types = right_estimate.sub_types(&mut self.ctx);

        if !rhs_sub_types.contains_all(&left_estimate, &mut self.ctx) {
            let xsection = left_estimate.intersected_with(&rhs_sub_types, &mut self.ctx);
            if xsection.is_empty() {
                return self.report_empty_estimate("LHS", cons_idx, &left_estimate, &right_estimate);
            }
            if xsection != left_estimate {
                debug!(
                    "narrowed {} to {}",
                    self.model.variable(cons.lhs),
                    xsection.render(self.ctx.universe())
                );
                let members = self.model.set_estimate(cons.lhs, xsection);
                self.work_list.extend(members);
            }
        }
        if !lhs_super_types.contains_all(&right_estimate, &mut self.ctx) {
            let xsection = right_estimate.intersected_with(&lhs_super_types, &mut self.ctx);
            if xsection.is_empty() {
                return self.report_empty_estimate("RHS", cons_idx, &left_estimate, &right_estimate);
            }
            if xsection != right_estimate {
                debug!(
                    "narrowed {} to {}",
                    self.model.variable(cons.rhs),
                    xsection.render(self.ctx.universe())
                );
                let members = self.model.set_estimate(cons.rhs, xsection);
                self.work_list.extend(members);
            }
        }
        Ok(())
    }

    fn report_empty_estimate(
        &self,
        side: &str,
        cons_idx: usize,
        left_estimate: &TypeSet,
        right_estimate: &TypeSet,
    ) -> Result<()> {
        let cons = self.model.constraint(cons_idx);
        let universe = self.ctx.universe();
        error!(
            "constraint system is contradictory at {} <= {}",
            self.model.variable(cons.lhs),
            self.model.variable(cons.rhs)
        );
        bail!(
            "type estimate is now empty for {} in {} <= {}; estimates were {} <= {}",
            side,
            self.model.variable(cons.lhs),
            self.model.variable(cons.rhs),
            left_estimate.render(universe),
            right_estimate.render(universe)
        )
    }

    /// Collapses every class estimate to a single chosen type and records
    /// which element declarations need a rewrite, grouped by compilation
    /// unit.
    fn choose_types(&mut self) -> HashMap<CompilationUnitId, Vec<VariableIndex>> {
        let mut declarations: HashMap<CompilationUnitId, Vec<VariableIndex>> = HashMap::new();
        for v in self.model.all_variables() {
            let estimate = self.estimate_or_universe(v);
            let chosen =
                estimate.choose_single_type(self.ctx.universe(), self.options.choice_policy);
            self.model.variable_mut(v).chosen_type = chosen;
            if chosen.is_none() {
                continue;
            }
            if let VariableKind::CollectionElement { .. } = self.model.variable(v).kind {
                if let Some(cu) = self.model.variable(v).origin {
                    declarations.entry(cu).or_default().push(v);
                }
            }
        }
        declarations
    }

    fn chosen_type_of(&mut self, v: VariableIndex) -> Option<TypeId> {
        if let Some(t) = self.model.variable(v).chosen_type {
            return Some(t);
        }
        let estimate = self.estimate_or_universe(v);
        estimate.choose_single_type(self.ctx.universe(), self.options.choice_policy)
    }

    /// A cast is redundant once its operand's chosen type is assignable to
    /// the cast target without it.
    fn find_casts_to_remove(&mut self) -> HashMap<CompilationUnitId, Vec<VariableIndex>> {
        let mut casts: HashMap<CompilationUnitId, Vec<VariableIndex>> = HashMap::new();
        for v in self.model.cast_variables().to_vec() {
            let (operand, target) = match self.model.variable(v).kind {
                VariableKind::Cast { operand, target } => (operand, target),
                _ => continue,
            };
            if let Some(chosen) = self.chosen_type_of(operand) {
                if self.ctx.universe().can_assign_to(chosen, target) {
                    if let Some(cu) = self.model.variable(v).origin {
                        casts.entry(cu).or_default().push(v);
                    }
                }
            }
        }
        casts
    }
}

#[cfg(test)]
mod tests {
    use super::{ConstraintSolver, SolverOptions};
    use crate::model::ConstraintModel;
    use crate::solver::type_set::ChoicePolicy;
    use crate::test_utils;
    use pretty_assertions::assert_eq;

    #[test]
    fn consistent_estimates_stay_put() {
        let universe = test_utils::java_ish_universe();
        let string = universe.lookup("String").unwrap();
        let mut model = ConstraintModel::new();
        model.add_typed_variable("x", string, None);
        model.add_variable("sink");
        model.install_notation("x <= sink").unwrap();

        let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
        let results = solver.solve_constraints().unwrap();
        assert_eq!(results.chosen_type_by_name("x"), Some(string));
        // sink narrowed to superTypes(String); the lower bound wins
        assert_eq!(results.chosen_type_by_name("sink"), Some(string));
    }

    #[test]
    fn contradictory_chain_is_a_fatal_error() {
        let universe = test_utils::java_ish_universe();
        let string = universe.lookup("String").unwrap();
        let integer = universe.lookup("Integer").unwrap();
        let mut model = ConstraintModel::new();
        model.add_typed_variable("a", string, None);
        model.add_variable("b");
        model.add_typed_variable("c", integer, None);
        model.install_notation("a <= b\nb <= c").unwrap();

        let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
        let err = solver.solve_constraints();
        assert!(err.is_err());
        let msg = format!("{}", err.err().unwrap());
        assert!(msg.contains("estimate is now empty"), "got: {}", msg);
    }

    #[test]
    fn cyclic_constraints_terminate() {
        let universe = test_utils::java_ish_universe();
        let string = universe.lookup("String").unwrap();
        let mut model = ConstraintModel::new();
        model.add_typed_variable("x", string, None);
        model.add_variable("y");
        model.install_notation("x <= y\ny <= x").unwrap();

        let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
        let results = solver.solve_constraints().unwrap();
        assert_eq!(results.chosen_type_by_name("x"), Some(string));
        assert_eq!(results.chosen_type_by_name("y"), Some(string));
    }

    #[test]
    fn element_types_flow_through_aliased_collections() {
        let _ = env_logger::builder().is_test(true).try_init();
        let universe = test_utils::java_ish_universe();
        let list = universe.lookup("List").unwrap();
        let string = universe.lookup("String").unwrap();
        let mut model = ConstraintModel::new();
        let cu = model.add_compilation_unit();
        let l1 = model.add_typed_variable("l1", list, Some(cu));
        model.add_typed_variable("l2", list, Some(cu));
        model.add_typed_variable("s", string, Some(cu));
        // s flows into l1's element; l1 flows into l2
        model.install_notation("s <= l1.0\nl1 <= l2").unwrap();

        let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
        let results = solver.solve_constraints().unwrap();

        let l2_elem = results
            .model()
            .existing_element_variable(results.model().variable_named("l2").unwrap(), 0)
            .unwrap();
        assert_eq!(results.chosen_type(l2_elem), Some(string));

        let l1_elem = results
            .model()
            .existing_element_variable(l1, 0)
            .unwrap();
        let updates = results.declarations_to_update.get(&cu).unwrap();
        assert!(updates.contains(&l1_elem));
        assert!(updates.contains(&l2_elem));
    }

    #[test]
    fn redundant_upcast_is_pruned_and_downcast_kept() {
        let universe = test_utils::java_ish_universe();
        let array_list = universe.lookup("ArrayList").unwrap();
        let list = universe.lookup("List").unwrap();
        let string = universe.lookup("String").unwrap();
        let mut model = ConstraintModel::new();
        let cu = model.add_compilation_unit();
        let x = model.add_typed_variable("x", array_list, Some(cu));
        let upcast = model.add_cast_variable("castToList", x, list, Some(cu));
        let downcast = model.add_cast_variable("castToString", x, string, Some(cu));

        let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
        let results = solver.solve_constraints().unwrap();
        let removed = results.casts_to_remove.get(&cu).unwrap();
        assert!(removed.contains(&upcast));
        assert!(!removed.contains(&downcast));
    }

    #[test]
    fn constraint_order_does_not_change_chosen_types() {
        let universe = test_utils::java_ish_universe();
        let integer = universe.lookup("Integer").unwrap();
        let number = universe.lookup("Number").unwrap();

        let build = |notation: &str| {
            let mut model = ConstraintModel::new();
            model.add_typed_variable("i", integer, None);
            model.add_typed_variable("n", number, None);
            model.add_variable("a");
            model.add_variable("b");
            model.install_notation(notation).unwrap();
            let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
            solver.solve_constraints().unwrap()
        };

        let forward = build("i <= a\na <= b\nn <= b");
        let backward = build("n <= b\na <= b\ni <= a");
        for name in ["i", "n", "a", "b"].iter() {
            assert_eq!(
                forward.chosen_type_by_name(name),
                backward.chosen_type_by_name(name),
                "chosen type of {} depends on constraint order",
                name
            );
        }
    }

    #[test]
    fn chosen_types_satisfy_their_constraints() {
        let universe = test_utils::java_ish_universe();
        let integer = universe.lookup("Integer").unwrap();
        let number = universe.lookup("Number").unwrap();
        let mut model = ConstraintModel::new();
        model.add_typed_variable("i", integer, None);
        model.add_typed_variable("n", number, None);
        model.add_variable("mid");
        model.install_notation("i <= mid\nmid <= n").unwrap();

        let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
        let results = solver.solve_constraints().unwrap();
        for cons in results.model().constraints().iter() {
            let lhs = results.chosen_type(cons.lhs);
            let rhs = results.chosen_type(cons.rhs);
            if let (Some(l), Some(r)) = (lhs, rhs) {
                assert!(
                    universe.can_assign_to(l, r),
                    "{} <= {} violated by chosen types {} and {}",
                    results.model().variable(cons.lhs),
                    results.model().variable(cons.rhs),
                    universe.name(l),
                    universe.name(r)
                );
            }
        }
    }

    #[test]
    fn root_typed_sink_is_no_restriction() {
        let universe = test_utils::java_ish_universe();
        let object = universe.root();
        let mut model = ConstraintModel::new();
        model.add_variable("x");
        model.add_typed_variable("obj", object, None);
        model.install_notation("x <= obj").unwrap();

        // flowing into an Object-typed variable restricts nothing, so x must
        // keep the universe estimate and get no chosen type
        let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
        let results = solver.solve_constraints().unwrap();
        assert_eq!(results.chosen_type_by_name("x"), None);
        assert_eq!(results.chosen_type_by_name("obj"), Some(object));
    }

    #[test]
    fn untouched_variables_get_no_chosen_type() {
        let universe = test_utils::java_ish_universe();
        let mut model = ConstraintModel::new();
        model.add_variable("floating");
        let solver = ConstraintSolver::new(model, &universe, SolverOptions::default());
        let results = solver.solve_constraints().unwrap();
        assert_eq!(results.chosen_type_by_name("floating"), None);
    }

    #[test]
    fn independent_bounds_seed_only_on_request() {
        let universe = test_utils::java_ish_universe();
        let number = universe.lookup("Number").unwrap();

        let build = |seed: bool| {
            let mut model = ConstraintModel::new();
            model.add_independent_type_variable("t", vec![number]);
            let options = SolverOptions {
                choice_policy: ChoicePolicy::PreferLowerBound,
                seed_independent_from_bounds: seed,
            };
            let solver = ConstraintSolver::new(model, &universe, options);
            solver.solve_constraints().unwrap()
        };

        assert_eq!(build(false).chosen_type_by_name("t"), None);
        assert_eq!(build(true).chosen_type_by_name("t"), Some(number));
    }
}
