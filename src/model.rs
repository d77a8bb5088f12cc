//! The constraint model handed to the solver by upstream program analysis:
//! an arena of constraint variables, the directed subtype constraints over
//! them with a reverse "used in" index, the element-slot structure of
//! parametric types, and the equivalence classes forcing groups of
//! variables to share one type estimate.
//!
//! Equivalence classes are an explicit union-find over arena indices. Once
//! two classes merge they never re-split; the shared estimate lives on the
//! class record at the canonical root, so there is no aliasing of mutable
//! set objects between variables.

use std::collections::{BTreeSet, HashMap, VecDeque};

use anyhow::{anyhow, Result};
use log::{debug, warn};

use crate::constraints::{
    parse_constraint_list, CompilationUnitId, ConstraintSet, ParsedTerm, SubtypeConstraint,
    Variable, VariableIndex, VariableKind,
};
use crate::hierarchy::{TypeId, TypeUniverse};
use crate::solver::type_set::TypeSet;

/// The record owned by the canonical root of an equivalence class: the
/// variables known to denote the same runtime type, and their one shared
/// estimate.
#[derive(Debug, Clone)]
pub struct ClassRecord {
    members: Vec<VariableIndex>,
    estimate: Option<TypeSet>,
}

impl ClassRecord {
    fn singleton(v: VariableIndex) -> ClassRecord {
        ClassRecord {
            members: vec![v],
            estimate: None,
        }
    }

    /// The variables contributing to this class.
    pub fn members(&self) -> &[VariableIndex] {
        &self.members
    }

    /// The class's current shared estimate, if seeded.
    pub fn estimate(&self) -> Option<&TypeSet> {
        self.estimate.as_ref()
    }
}

/// The container for one inference run's variables and constraints.
#[derive(Debug, Default)]
pub struct ConstraintModel {
    variables: Vec<Variable>,
    by_name: HashMap<String, VariableIndex>,
    constraints: Vec<SubtypeConstraint>,
    seen_constraints: ConstraintSet,
    used_in: HashMap<VariableIndex, Vec<usize>>,
    elements: HashMap<(VariableIndex, usize), VariableIndex>,
    element_positions: HashMap<VariableIndex, BTreeSet<usize>>,
    cast_variables: Vec<VariableIndex>,
    next_unit: u32,
    // union-find over variable indices; records[i] is meaningful only while
    // i is its own root
    parent: Vec<u32>,
    records: Vec<ClassRecord>,
}

impl ConstraintModel {
    /// Creates an empty model.
    pub fn new() -> ConstraintModel {
        Default::default()
    }

    /// Registers a compilation unit and returns its identity.
    pub fn add_compilation_unit(&mut self) -> CompilationUnitId {
        let id = CompilationUnitId(self.next_unit);
        self.next_unit += 1;
        id
    }

    fn push_variable(&mut self, var: Variable) -> VariableIndex {
        let idx = VariableIndex(self.variables.len() as u32);
        if !var.label.is_empty() {
            self.by_name.entry(var.label.clone()).or_insert(idx);
        }
        self.variables.push(var);
        self.parent.push(idx.0);
        self.records.push(ClassRecord::singleton(idx));
        idx
    }

    /// Adds a plain expression variable with no declared type.
    pub fn add_variable(&mut self, label: &str) -> VariableIndex {
        self.push_variable(Variable::new(label.to_owned()))
    }

    /// Adds an expression variable with a declared (raw) type.
    pub fn add_typed_variable(
        &mut self,
        label: &str,
        ty: TypeId,
        origin: Option<CompilationUnitId>,
    ) -> VariableIndex {
        let mut var = Variable::with_declared_type(label.to_owned(), ty);
        var.origin = origin;
        self.push_variable(var)
    }

    /// Adds a bounded type-parameter variable not tied to a declaration.
    pub fn add_independent_type_variable(
        &mut self,
        label: &str,
        bounds: Vec<TypeId>,
    ) -> VariableIndex {
        let mut var = Variable::new(label.to_owned());
        var.kind = VariableKind::IndependentTypeVariable { bounds };
        self.push_variable(var)
    }

    /// Adds a cast variable for a cast of `operand` to `target`.
    pub fn add_cast_variable(
        &mut self,
        label: &str,
        operand: VariableIndex,
        target: TypeId,
        origin: Option<CompilationUnitId>,
    ) -> VariableIndex {
        let mut var = Variable::new(label.to_owned());
        var.kind = VariableKind::Cast { operand, target };
        var.origin = origin;
        let idx = self.push_variable(var);
        self.cast_variables.push(idx);
        idx
    }

    /// Looks a variable up by its label.
    pub fn variable_named(&self, name: &str) -> Option<VariableIndex> {
        self.by_name.get(name).copied()
    }

    fn variable_named_or_create(&mut self, name: &str) -> VariableIndex {
        match self.by_name.get(name) {
            Some(&idx) => idx,
            None => self.add_variable(name),
        }
    }

    /// The variable record at `idx`.
    pub fn variable(&self, idx: VariableIndex) -> &Variable {
        &self.variables[idx.index()]
    }

    /// Mutable access to the variable record at `idx`.
    pub fn variable_mut(&mut self, idx: VariableIndex) -> &mut Variable {
        &mut self.variables[idx.index()]
    }

    /// Every variable currently in the arena, in creation order.
    pub fn all_variables(&self) -> Vec<VariableIndex> {
        (0..self.variables.len() as u32).map(VariableIndex).collect()
    }

    /// The number of variables in the arena.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// True iff the model holds no variables.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// The cast variables registered so far.
    pub fn cast_variables(&self) -> &[VariableIndex] {
        &self.cast_variables
    }

    /// Gets or creates the element-slot variable of `parent` at `position`.
    /// The created variable inherits the parent's compilation unit, since a
    /// rewrite of the element type edits the parent's declaration.
    pub fn element_variable(&mut self, parent: VariableIndex, position: usize) -> VariableIndex {
        if let Some(&existing) = self.elements.get(&(parent, position)) {
            return existing;
        }
        let label = format!("{}.{}", self.variables[parent.index()].label, position);
        let mut var = Variable::new(label);
        var.kind = VariableKind::CollectionElement {
            enclosing: parent,
            position,
        };
        var.origin = self.variables[parent.index()].origin;
        let idx = self.push_variable(var);
        self.elements.insert((parent, position), idx);
        self.element_positions.entry(parent).or_default().insert(position);
        idx
    }

    /// The element slot of `parent` at `position`, if it exists.
    pub fn existing_element_variable(
        &self,
        parent: VariableIndex,
        position: usize,
    ) -> Option<VariableIndex> {
        self.elements.get(&(parent, position)).copied()
    }

    /// Adds a directed constraint `lhs <= rhs` and indexes it under both
    /// endpoints. Duplicate constraints are ignored.
    pub fn add_subtype_constraint(&mut self, lhs: VariableIndex, rhs: VariableIndex) {
        let cons = SubtypeConstraint::new(lhs, rhs);
        if !self.seen_constraints.insert(cons) {
            return;
        }
        let idx = self.constraints.len();
        self.constraints.push(cons);
        self.used_in.entry(lhs).or_default().push(idx);
        if rhs != lhs {
            self.used_in.entry(rhs).or_default().push(idx);
        }
    }

    /// The constraints referencing `v`, as indices into the constraint list.
    pub fn used_in(&self, v: VariableIndex) -> &[usize] {
        self.used_in.get(&v).map(|x| x.as_slice()).unwrap_or(&[])
    }

    /// The constraint at `idx`, in discovery order.
    pub fn constraint(&self, idx: usize) -> SubtypeConstraint {
        self.constraints[idx]
    }

    /// All constraints in discovery order.
    pub fn constraints(&self) -> &[SubtypeConstraint] {
        &self.constraints
    }

    /// The canonical root of `v`'s equivalence class, with path compression.
    pub fn find(&mut self, v: VariableIndex) -> VariableIndex {
        let mut root = v;
        while self.parent[root.index()] != root.0 {
            root = VariableIndex(self.parent[root.index()]);
        }
        let mut cur = v;
        while cur != root {
            let next = VariableIndex(self.parent[cur.index()]);
            self.parent[cur.index()] = root.0;
            cur = next;
        }
        root
    }

    /// Forces `a` and `b` to share one type estimate from now on. Classes
    /// never re-split. Returns the surviving root.
    pub fn make_equivalent(&mut self, a: VariableIndex, b: VariableIndex) -> VariableIndex {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        // union by size
        let (winner, loser) =
            if self.records[ra.index()].members.len() >= self.records[rb.index()].members.len() {
                (ra, rb)
            } else {
                (rb, ra)
            };
        self.parent[loser.index()] = winner.0;
        let absorbed = std::mem::replace(
            &mut self.records[loser.index()],
            ClassRecord::singleton(loser),
        );
        let rec = &mut self.records[winner.index()];
        rec.members.extend(absorbed.members);
        if let Some(e) = absorbed.estimate {
            if rec.estimate.is_none() {
                rec.estimate = Some(e);
            } else {
                // unification is supposed to run before estimates are seeded
                warn!(
                    "merging equivalence classes {} and {} that both carry estimates",
                    winner, loser
                );
            }
        }
        winner
    }

    /// The members of `v`'s equivalence class.
    pub fn class_members(&mut self, v: VariableIndex) -> Vec<VariableIndex> {
        let root = self.find(v);
        self.records[root.index()].members.clone()
    }

    /// The shared estimate of `v`'s class, if seeded.
    pub fn estimate(&mut self, v: VariableIndex) -> Option<TypeSet> {
        let root = self.find(v);
        self.records[root.index()].estimate.clone()
    }

    /// Installs a tighter estimate on `v`'s class and returns the members
    /// that must be revisited.
    pub fn set_estimate(&mut self, v: VariableIndex, estimate: TypeSet) -> Vec<VariableIndex> {
        let root = self.find(v);
        self.records[root.index()].estimate = Some(estimate);
        self.records[root.index()].members.clone()
    }

    /// One representative per equivalence class, for snapshot iteration.
    pub fn equivalence_roots(&mut self) -> Vec<VariableIndex> {
        let all = self.all_variables();
        let mut roots = BTreeSet::new();
        for v in all {
            let r = self.find(v);
            roots.insert(r);
        }
        roots.into_iter().collect()
    }

    /// Structure discovery: create the element-slot variables implied by
    /// every variable whose declared type is parametric, recursively, so
    /// nested parametric structures (collection-of-collections) get slots
    /// too. Returns the newly created variables.
    pub fn derive_element_variables(&mut self, universe: &TypeUniverse) -> Vec<VariableIndex> {
        let mut created = Vec::new();
        let mut queue: VecDeque<VariableIndex> = self.all_variables().into();
        while let Some(v) = queue.pop_front() {
            let arity = match self.variables[v.index()].declared_type {
                Some(ty) => universe.arity(ty),
                None => 0,
            };
            for position in 0..arity {
                if self.existing_element_variable(v, position).is_none() {
                    let elem = self.element_variable(v, position);
                    created.push(elem);
                    queue.push_back(elem);
                }
            }
        }
        created
    }

    /// Positions for which either side should carry an element slot: slots
    /// already present on either variable, plus the declared arity of each.
    fn shared_element_positions(
        &self,
        universe: &TypeUniverse,
        a: VariableIndex,
        b: VariableIndex,
    ) -> BTreeSet<usize> {
        let mut positions = BTreeSet::new();
        for v in [a, b].iter() {
            if let Some(known) = self.element_positions.get(v) {
                positions.extend(known.iter().copied());
            }
            if let Some(ty) = self.variables[v.index()].declared_type {
                positions.extend(0..universe.arity(ty));
            }
        }
        positions
    }

    /// Recursively forces the element structures of `a` and `b` to be
    /// equal: for every element position present on either side, both slots
    /// are created if missing, merged into one equivalence class, and their
    /// own element structures unified in turn. This is how aliasing between
    /// two raw `List`s reaches down to their element type.
    pub fn create_element_equals_constraints(
        &mut self,
        universe: &TypeUniverse,
        a: VariableIndex,
        b: VariableIndex,
    ) {
        for position in self.shared_element_positions(universe, a, b) {
            let ea = self.element_variable(a, position);
            let eb = self.element_variable(b, position);
            if self.find(ea) == self.find(eb) {
                continue;
            }
            debug!("unifying element slots {} and {}", ea, eb);
            self.make_equivalent(ea, eb);
            self.create_element_equals_constraints(universe, ea, eb);
        }
    }

    /// Installs constraints written in the textual notation: one
    /// `lhs <= rhs` per line, with `.N` element paths. Base names resolve
    /// to existing variables or create plain ones.
    pub fn install_notation(&mut self, text: &str) -> Result<()> {
        let (rest, parsed) = parse_constraint_list(text)
            .map_err(|e| anyhow!("failed to parse constraint notation: {}", e))?;
        if !rest.is_empty() {
            return Err(anyhow!("trailing input in constraint notation: {:?}", rest));
        }
        for cons in parsed {
            let lhs = self.resolve_term(&cons.lhs);
            let rhs = self.resolve_term(&cons.rhs);
            self.add_subtype_constraint(lhs, rhs);
        }
        Ok(())
    }

    fn resolve_term(&mut self, term: &ParsedTerm) -> VariableIndex {
        let mut var = self.variable_named_or_create(&term.name);
        for &position in term.path.iter() {
            var = self.element_variable(var, position);
        }
        var
    }
}

#[cfg(test)]
mod tests {
    use super::ConstraintModel;
    use crate::test_utils;
    use pretty_assertions::assert_eq;

    #[test]
    fn used_in_indexes_both_endpoints() {
        let mut model = ConstraintModel::new();
        let x = model.add_variable("x");
        let y = model.add_variable("y");
        let z = model.add_variable("z");
        model.add_subtype_constraint(x, y);
        model.add_subtype_constraint(y, z);
        // duplicate is dropped
        model.add_subtype_constraint(x, y);

        assert_eq!(model.constraints().len(), 2);
        assert_eq!(model.used_in(x), &[0]);
        assert_eq!(model.used_in(y), &[0, 1]);
        assert_eq!(model.used_in(z), &[1]);
    }

    #[test]
    fn union_find_merges_and_never_resplits() {
        let mut model = ConstraintModel::new();
        let a = model.add_variable("a");
        let b = model.add_variable("b");
        let c = model.add_variable("c");

        model.make_equivalent(a, b);
        model.make_equivalent(b, c);
        assert_eq!(model.find(a), model.find(c));
        let mut members = model.class_members(a);
        members.sort();
        assert_eq!(members, vec![a, b, c]);
        assert_eq!(model.equivalence_roots().len(), 1);
    }

    #[test]
    fn structure_discovery_creates_nested_slots() {
        let universe = test_utils::java_ish_universe();
        let list = universe.lookup("List").unwrap();
        let mut model = ConstraintModel::new();
        let xs = model.add_typed_variable("xs", list, None);
        // the element of xs is itself a raw List
        let elem = model.element_variable(xs, 0);
        model.variable_mut(elem).declared_type = Some(list);

        let created = model.derive_element_variables(&universe);
        // the nested slot xs.0.0 was derived
        assert_eq!(created.len(), 1);
        let nested = model.existing_element_variable(elem, 0).unwrap();
        assert_eq!(model.variable(nested).label, "xs.0.0");
    }

    #[test]
    fn element_unification_recurses() {
        let universe = test_utils::java_ish_universe();
        let list = universe.lookup("List").unwrap();
        let mut model = ConstraintModel::new();
        let xs = model.add_typed_variable("xs", list, None);
        let ys = model.add_typed_variable("ys", list, None);
        let xs_elem = model.element_variable(xs, 0);

        model.create_element_equals_constraints(&universe, xs, ys);
        let ys_elem = model.existing_element_variable(ys, 0).unwrap();
        assert_eq!(model.find(xs_elem), model.find(ys_elem));
    }

    #[test]
    fn notation_round_trips_into_constraints() {
        let mut model = ConstraintModel::new();
        model.install_notation("x <= y\nxs.0 <= x").unwrap();
        let x = model.variable_named("x").unwrap();
        let xs = model.variable_named("xs").unwrap();
        let elem = model.existing_element_variable(xs, 0).unwrap();
        assert_eq!(model.constraints().len(), 2);
        assert_eq!(model.constraint(1).lhs, elem);
        assert_eq!(model.constraint(1).rhs, x);
    }

    #[test]
    fn bad_notation_is_rejected() {
        let mut model = ConstraintModel::new();
        assert!(model.install_notation("x <= ").is_err());
    }
}
