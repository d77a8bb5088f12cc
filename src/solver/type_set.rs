//! The lattice of set-valued type estimates.
//!
//! An estimate is an upper approximation of the concrete types a constraint
//! variable may take. Estimates only ever shrink under [TypeSet::intersected_with],
//! which is what guarantees the solver's worklist terminates. Intersection is
//! two-tier: an algebraic shortcut table on the variant pairing first, and
//! element-wise intersection of materialized sets only when no shortcut
//! applies, so the expensive closures ("all supertypes of X") stay lazy as
//! long as possible.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use itertools::Itertools;

use crate::hierarchy::{TypeId, TypeUniverse};

/// Run-scoped memoization for closure materialization, keyed by base type.
/// One context is created per solver run; nothing here outlives the run, so
/// independent runs can never alias each other's caches.
pub struct TypeContext<'u> {
    universe: &'u TypeUniverse,
    super_closures: HashMap<TypeId, Rc<BTreeSet<TypeId>>>,
    sub_closures: HashMap<TypeId, Rc<BTreeSet<TypeId>>>,
}

impl<'u> TypeContext<'u> {
    /// Creates an empty context over the given universe.
    pub fn new(universe: &'u TypeUniverse) -> TypeContext<'u> {
        TypeContext {
            universe,
            super_closures: HashMap::new(),
            sub_closures: HashMap::new(),
        }
    }

    /// The universe this context materializes closures over.
    pub fn universe(&self) -> &'u TypeUniverse {
        self.universe
    }

    /// The supertype closure of `ty`, inclusive of `ty` itself.
    pub fn super_closure(&mut self, ty: TypeId) -> Rc<BTreeSet<TypeId>> {
        let universe = self.universe;
        self.super_closures
            .entry(ty)
            .or_insert_with(|| {
                let mut closure = universe.all_super_types(ty);
                closure.insert(ty);
                Rc::new(closure)
            })
            .clone()
    }

    /// The subtype closure of `ty`, inclusive of `ty` itself.
    pub fn sub_closure(&mut self, ty: TypeId) -> Rc<BTreeSet<TypeId>> {
        let universe = self.universe;
        self.sub_closures
            .entry(ty)
            .or_insert_with(|| {
                let mut closure = universe.all_sub_types(ty);
                closure.insert(ty);
                Rc::new(closure)
            })
            .clone()
    }
}

/// How [TypeSet::choose_single_type] breaks ties when an estimate still holds
/// more than one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoicePolicy {
    /// Prefer the most specific candidate (the cone base of a supertype
    /// bound, the first minimal member of an enumerated set). This matches
    /// preferring the declared type and is the default.
    PreferLowerBound,
    /// Prefer the most general candidate.
    PreferUpperBound,
}

impl Default for ChoicePolicy {
    fn default() -> Self {
        ChoicePolicy::PreferLowerBound
    }
}

/// A set of candidate concrete types, in one of several specialized
/// representations. The cone representations stay symbolic until an
/// operation genuinely needs their members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSet {
    /// No constraint observed yet; every type is still a candidate.
    Universe,
    /// Provably unsatisfiable. Reaching this mid-propagation is a solver
    /// failure, not a recoverable state.
    Empty,
    /// Exactly one candidate.
    Singleton(TypeId),
    /// The base type and everything it can be assigned to.
    SuperTypesOf(TypeId),
    /// The base type and everything assignable to it.
    SubTypesOf(TypeId),
    /// An explicitly materialized set; the fallback when no cone or
    /// singleton algebra applies. Always holds at least two members.
    Enumerated(BTreeSet<TypeId>),
}

impl TypeSet {
    /// Builds the canonical representation for an explicit member set:
    /// [TypeSet::Empty] for zero members, [TypeSet::Singleton] for one.
    pub fn from_members(members: BTreeSet<TypeId>) -> TypeSet {
        match members.len() {
            0 => TypeSet::Empty,
            1 => TypeSet::Singleton(*members.iter().next().unwrap()),
            _ => TypeSet::Enumerated(members),
        }
    }

    /// True iff no type is excluded.
    pub fn is_universe(&self) -> bool {
        matches!(self, TypeSet::Universe)
    }

    /// True iff no candidate remains.
    pub fn is_empty(&self) -> bool {
        matches!(self, TypeSet::Empty)
    }

    /// True iff exactly one candidate remains. The only type without a
    /// proper supertype is the universe root, so a supertype cone over the
    /// root is a singleton too.
    pub fn is_singleton(&self, universe: &TypeUniverse) -> bool {
        match self {
            TypeSet::Singleton(_) => true,
            TypeSet::SuperTypesOf(base) => *base == universe.root(),
            TypeSet::SubTypesOf(base) => universe.all_sub_types(*base).is_empty(),
            _ => false,
        }
    }

    /// Some arbitrary but deterministic member, if one exists.
    pub fn any_member(&self, universe: &TypeUniverse) -> Option<TypeId> {
        match self {
            TypeSet::Universe => Some(universe.root()),
            TypeSet::Empty => None,
            TypeSet::Singleton(t) => Some(*t),
            TypeSet::SuperTypesOf(base) | TypeSet::SubTypesOf(base) => Some(*base),
            TypeSet::Enumerated(members) => members.iter().next().copied(),
        }
    }

    /// Membership test; never materializes a cone.
    pub fn contains(&self, t: TypeId, universe: &TypeUniverse) -> bool {
        match self {
            TypeSet::Universe => true,
            TypeSet::Empty => false,
            TypeSet::Singleton(member) => *member == t,
            TypeSet::SuperTypesOf(base) => universe.can_assign_to(*base, t),
            TypeSet::SubTypesOf(base) => universe.can_assign_to(t, *base),
            TypeSet::Enumerated(members) => members.contains(&t),
        }
    }

    /// The member every other member can be assigned to, if there is one.
    pub fn unique_upper_bound(&self, universe: &TypeUniverse) -> Option<TypeId> {
        match self {
            TypeSet::Universe => Some(universe.root()),
            TypeSet::Empty => None,
            TypeSet::Singleton(t) => Some(*t),
            TypeSet::SuperTypesOf(_) => Some(universe.root()),
            TypeSet::SubTypesOf(base) => Some(*base),
            TypeSet::Enumerated(members) => members
                .iter()
                .find(|m| {
                    members
                        .iter()
                        .all(|o| universe.can_assign_to(*o, **m))
                })
                .copied(),
        }
    }

    /// The member assignable to every other member, if there is one.
    pub fn unique_lower_bound(&self, universe: &TypeUniverse) -> Option<TypeId> {
        match self {
            TypeSet::Universe => None,
            TypeSet::Empty => None,
            TypeSet::Singleton(t) => Some(*t),
            TypeSet::SuperTypesOf(base) => Some(*base),
            TypeSet::SubTypesOf(_) => None,
            TypeSet::Enumerated(members) => members
                .iter()
                .find(|m| {
                    members
                        .iter()
                        .all(|o| universe.can_assign_to(**m, *o))
                })
                .copied(),
        }
    }

    /// Intersects two estimates. Algebraic shortcuts on the variant pairing
    /// are tried first; only when none applies are both sides materialized
    /// and intersected member-wise.
    pub fn intersected_with(&self, other: &TypeSet, ctx: &mut TypeContext) -> TypeSet {
        let universe = ctx.universe();
        match (self, other) {
            (TypeSet::Universe, x) | (x, TypeSet::Universe) => x.clone(),
            (TypeSet::Empty, _) | (_, TypeSet::Empty) => TypeSet::Empty,
            (TypeSet::Singleton(a), _) => {
                if other.contains(*a, universe) {
                    TypeSet::Singleton(*a)
                } else {
                    TypeSet::Empty
                }
            }
            (_, TypeSet::Singleton(b)) => {
                if self.contains(*b, universe) {
                    TypeSet::Singleton(*b)
                } else {
                    TypeSet::Empty
                }
            }
            (TypeSet::SuperTypesOf(a), TypeSet::SuperTypesOf(b)) => {
                // xsect(superTypes(A), superTypes(B)) is the cone over the
                // higher base when the bases are comparable.
                if universe.can_assign_to(*b, *a) {
                    TypeSet::SuperTypesOf(*a)
                } else if universe.can_assign_to(*a, *b) {
                    TypeSet::SuperTypesOf(*b)
                } else {
                    self.enumerated_intersection(other, ctx)
                }
            }
            (TypeSet::SubTypesOf(a), TypeSet::SubTypesOf(b)) => {
                if universe.can_assign_to(*a, *b) {
                    TypeSet::SubTypesOf(*a)
                } else if universe.can_assign_to(*b, *a) {
                    TypeSet::SubTypesOf(*b)
                } else {
                    self.enumerated_intersection(other, ctx)
                }
            }
            (TypeSet::SuperTypesOf(lower), _) => {
                Self::cone_from_below(*lower, other, ctx)
            }
            (_, TypeSet::SuperTypesOf(lower)) => {
                Self::cone_from_below(*lower, self, ctx)
            }
            _ => self.enumerated_intersection(other, ctx),
        }
    }

    /// Intersection of `superTypes(lower)` with an estimate that has a
    /// unique upper bound, without materializing the cone when the bounds
    /// decide the answer outright.
    fn cone_from_below(lower: TypeId, other: &TypeSet, ctx: &mut TypeContext) -> TypeSet {
        let universe = ctx.universe();
        if let Some(upper) = other.unique_upper_bound(universe) {
            if upper == lower {
                return TypeSet::Singleton(lower);
            }
            if universe.can_assign_to(upper, lower) || !universe.can_assign_to(lower, upper) {
                // everything in `other` sits at or below `upper`, which is
                // either strictly below `lower` or incomparable to it
                return TypeSet::Empty;
            }
        }
        TypeSet::SuperTypesOf(lower).enumerated_intersection(other, ctx)
    }

    fn enumerated_intersection(&self, other: &TypeSet, ctx: &mut TypeContext) -> TypeSet {
        let mine = self.enumerate(ctx);
        let theirs = other.enumerate(ctx);
        TypeSet::from_members(mine.intersection(&theirs).copied().collect())
    }

    /// True iff every member of `other` is a member of this set. Cone pairs
    /// are answered by comparing bounds; otherwise `other` is materialized
    /// and checked member-wise.
    pub fn contains_all(&self, other: &TypeSet, ctx: &mut TypeContext) -> bool {
        let universe = ctx.universe();
        match (self, other) {
            (TypeSet::Universe, _) => true,
            (_, TypeSet::Empty) => true,
            (TypeSet::Empty, _) => false,
            // a subtype cone over the root holds every type
            (TypeSet::SubTypesOf(b), TypeSet::Universe) => *b == universe.root(),
            (_, TypeSet::Universe) => false,
            (TypeSet::SuperTypesOf(a), TypeSet::SuperTypesOf(b)) => {
                universe.can_assign_to(*a, *b)
            }
            (TypeSet::SubTypesOf(a), TypeSet::SubTypesOf(b)) => universe.can_assign_to(*b, *a),
            (_, TypeSet::Singleton(t)) => self.contains(*t, universe),
            _ => {
                let theirs = other.enumerate(ctx);
                theirs.iter().all(|t| self.contains(*t, ctx.universe()))
            }
        }
    }

    /// The closure of this estimate under "all supertypes of a member".
    pub fn super_types(&self, ctx: &mut TypeContext) -> TypeSet {
        match self {
            TypeSet::Universe => TypeSet::Universe,
            TypeSet::Empty => TypeSet::Empty,
            TypeSet::Singleton(t) => TypeSet::SuperTypesOf(*t),
            // already closed upward
            TypeSet::SuperTypesOf(t) => TypeSet::SuperTypesOf(*t),
            TypeSet::SubTypesOf(_) | TypeSet::Enumerated(_) => {
                let members = self.enumerate(ctx);
                let mut closed = BTreeSet::new();
                for m in members.iter() {
                    closed.extend(ctx.super_closure(*m).iter().copied());
                }
                TypeSet::from_members(closed)
            }
        }
    }

    /// The closure of this estimate under "all subtypes of a member".
    /// Subtypes of the root are the whole universe, so that case normalizes
    /// to [TypeSet::Universe] rather than keeping a cone the rest of the
    /// algebra would mistake for a genuine restriction.
    pub fn sub_types(&self, ctx: &mut TypeContext) -> TypeSet {
        let root = ctx.universe().root();
        match self {
            TypeSet::Universe => TypeSet::Universe,
            TypeSet::Empty => TypeSet::Empty,
            TypeSet::Singleton(t) | TypeSet::SubTypesOf(t) if *t == root => TypeSet::Universe,
            TypeSet::Singleton(t) => TypeSet::SubTypesOf(*t),
            TypeSet::SubTypesOf(t) => TypeSet::SubTypesOf(*t),
            TypeSet::SuperTypesOf(_) | TypeSet::Enumerated(_) => {
                let members = self.enumerate(ctx);
                let mut closed = BTreeSet::new();
                for m in members.iter() {
                    closed.extend(ctx.sub_closure(*m).iter().copied());
                }
                TypeSet::from_members(closed)
            }
        }
    }

    /// Materializes the estimate into an explicit member set. Cone closures
    /// are memoized in the [TypeContext].
    pub fn enumerate(&self, ctx: &mut TypeContext) -> BTreeSet<TypeId> {
        match self {
            TypeSet::Universe => ctx.universe().all_types(),
            TypeSet::Empty => BTreeSet::new(),
            TypeSet::Singleton(t) => {
                let mut s = BTreeSet::new();
                s.insert(*t);
                s
            }
            TypeSet::SuperTypesOf(t) => ctx.super_closure(*t).as_ref().clone(),
            TypeSet::SubTypesOf(t) => ctx.sub_closure(*t).as_ref().clone(),
            TypeSet::Enumerated(members) => members.clone(),
        }
    }

    /// Deterministically selects one concrete type from the estimate.
    /// Returns `None` for the universe (no restriction was ever observed,
    /// so nothing should be rewritten) and for the empty set.
    pub fn choose_single_type(
        &self,
        universe: &TypeUniverse,
        policy: ChoicePolicy,
    ) -> Option<TypeId> {
        match self {
            TypeSet::Universe => None,
            TypeSet::Empty => None,
            TypeSet::Singleton(t) => Some(*t),
            TypeSet::SuperTypesOf(base) => match policy {
                ChoicePolicy::PreferLowerBound => Some(*base),
                ChoicePolicy::PreferUpperBound => Some(universe.root()),
            },
            TypeSet::SubTypesOf(base) => Some(*base),
            TypeSet::Enumerated(members) => match policy {
                ChoicePolicy::PreferLowerBound => members
                    .iter()
                    .find(|m| {
                        !members
                            .iter()
                            .any(|o| o != *m && universe.can_assign_to(*o, **m))
                    })
                    .copied(),
                ChoicePolicy::PreferUpperBound => members
                    .iter()
                    .find(|m| {
                        !members
                            .iter()
                            .any(|o| o != *m && universe.can_assign_to(**m, *o))
                    })
                    .copied(),
            },
        }
    }

    /// Renders the estimate with type names for diagnostics.
    pub fn render(&self, universe: &TypeUniverse) -> String {
        match self {
            TypeSet::Universe => "<universe>".to_owned(),
            TypeSet::Empty => "<empty>".to_owned(),
            TypeSet::Singleton(t) => format!("{{{}}}", universe.name(*t)),
            TypeSet::SuperTypesOf(t) => format!("superTypes({})", universe.name(*t)),
            TypeSet::SubTypesOf(t) => format!("subTypes({})", universe.name(*t)),
            TypeSet::Enumerated(members) => format!(
                "{{{}}}",
                members.iter().map(|t| universe.name(*t)).join(", ")
            ),
        }
    }
}
