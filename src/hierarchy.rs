//! The finite universe of declared types and the assignability relation over them.
//!
//! The solver never inspects source code; it only ever asks this oracle
//! whether one declared type can be assigned to another, and for the
//! reachability closures (all supertypes / all subtypes) that back the lazy
//! [TypeSet](crate::solver::type_set::TypeSet) representations.

use std::collections::{BTreeSet, HashMap};

use anyhow::{anyhow, Context, Result};
use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, Reversed, Walker},
    Directed, Graph,
};
use serde::{Deserialize, Serialize};

/// Identifies a declared type within its [TypeUniverse].
pub type TypeId = NodeIndex;

/// A named declared type together with its generic arity (the number of type
/// parameters; 0 for non-parametric types).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredType {
    name: String,
    arity: usize,
}

impl DeclaredType {
    /// Creates a declared type with the given name and generic arity.
    pub fn new(name: String, arity: usize) -> DeclaredType {
        DeclaredType { name, arity }
    }

    /// The source-level name of this type.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// The number of generic type parameters this type declares.
    pub fn get_arity(&self) -> usize {
        self.arity
    }
}

/// The finite domain of declared types, organized as a directed graph where
/// an edge `sub -> sup` records a direct extends/implements relationship.
/// Assignability is reflexive-transitive reachability along these edges.
pub struct TypeUniverse {
    grph: DiGraph<DeclaredType, ()>,
    by_name: HashMap<String, TypeId>,
    root: TypeId,
}

impl TypeUniverse {
    /// Creates a universe containing only the root type (the top of the
    /// assignability relation, e.g. `java.lang.Object`).
    pub fn new(root_name: &str) -> TypeUniverse {
        let mut grph: Graph<DeclaredType, (), Directed> = Graph::new();
        let root = grph.add_node(DeclaredType::new(root_name.to_owned(), 0));
        let mut by_name = HashMap::new();
        by_name.insert(root_name.to_owned(), root);
        TypeUniverse {
            grph,
            by_name,
            root,
        }
    }

    /// The top type every other type can be assigned to.
    pub fn root(&self) -> TypeId {
        self.root
    }

    /// Adds a declared type. Returns the existing id if the name is already
    /// present.
    pub fn add_type(&mut self, name: &str, arity: usize) -> TypeId {
        if let Some(&existing) = self.by_name.get(name) {
            return existing;
        }
        let nd = self
            .grph
            .add_node(DeclaredType::new(name.to_owned(), arity));
        self.by_name.insert(name.to_owned(), nd);
        nd
    }

    /// Records a direct extends relationship `sub -> sup`.
    pub fn add_extends(&mut self, sub: TypeId, sup: TypeId) {
        if !self.grph.contains_edge(sub, sup) {
            self.grph.add_edge(sub, sup, ());
        }
    }

    /// Looks a type up by name.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    /// The name of a type.
    pub fn name(&self, ty: TypeId) -> &str {
        self.grph[ty].get_name()
    }

    /// The generic arity of a type.
    pub fn arity(&self, ty: TypeId) -> usize {
        self.grph[ty].get_arity()
    }

    /// The number of types in the universe.
    pub fn len(&self) -> usize {
        self.grph.node_count()
    }

    /// True iff the universe holds no types beside the root.
    pub fn is_empty(&self) -> bool {
        self.grph.node_count() <= 1
    }

    /// Reflexive-transitive assignability: can a value of type `from` stand
    /// wherever a value of type `to` is expected?
    pub fn can_assign_to(&self, from: TypeId, to: TypeId) -> bool {
        if from == to {
            return true;
        }
        Dfs::new(&self.grph, from).iter(&self.grph).any(|n| n == to)
    }

    /// All proper supertypes of `ty` (exclusive of `ty` itself).
    pub fn all_super_types(&self, ty: TypeId) -> BTreeSet<TypeId> {
        let mut reached: BTreeSet<TypeId> = Dfs::new(&self.grph, ty).iter(&self.grph).collect();
        reached.remove(&ty);
        reached
    }

    /// All proper subtypes of `ty` (exclusive of `ty` itself).
    pub fn all_sub_types(&self, ty: TypeId) -> BTreeSet<TypeId> {
        let rev = Reversed(&self.grph);
        let mut reached: BTreeSet<TypeId> = Dfs::new(rev, ty).iter(rev).collect();
        reached.remove(&ty);
        reached
    }

    /// Every type in the universe.
    pub fn all_types(&self) -> BTreeSet<TypeId> {
        self.grph.node_indices().collect()
    }

    /// Checks that every type can reach the root, so that the root really is
    /// the top of the assignability relation.
    pub fn validate(&self) -> Result<()> {
        for nd in self.grph.node_indices() {
            if !self.can_assign_to(nd, self.root) {
                return Err(anyhow!(
                    "type {} cannot reach the root type {}",
                    self.name(nd),
                    self.name(self.root)
                ));
            }
        }
        Ok(())
    }
}

/// User input that defines a complete type universe: named direct-extends
/// edges, the handle of the root type, and the generic arity of each
/// parametric type (types absent from the arity map default to arity 0).
#[derive(Debug, Deserialize, Serialize)]
pub struct HierarchyDefinition {
    extends_relations: Vec<(String, String)>,
    root_handle: String,
    #[serde(default)]
    arities: HashMap<String, usize>,
}

impl HierarchyDefinition {
    /// Creates a definition from its parts.
    pub fn new(
        extends_relations: Vec<(String, String)>,
        root_handle: String,
        arities: HashMap<String, usize>,
    ) -> HierarchyDefinition {
        HierarchyDefinition {
            extends_relations,
            root_handle,
            arities,
        }
    }

    fn arity_of(&self, name: &str) -> usize {
        self.arities.get(name).copied().unwrap_or(0)
    }

    /// Builds a validated [TypeUniverse] from this definition.
    pub fn build(&self) -> Result<TypeUniverse> {
        let mut universe = TypeUniverse::new(&self.root_handle);
        for (sub, sup) in self.extends_relations.iter() {
            let sub_nd = universe.add_type(sub, self.arity_of(sub));
            let sup_nd = universe.add_type(sup, self.arity_of(sup));
            universe.add_extends(sub_nd, sup_nd);
        }
        universe
            .validate()
            .context("hierarchy definition does not form a rooted universe")?;
        Ok(universe)
    }
}

#[cfg(test)]
mod tests {
    use super::HierarchyDefinition;
    use crate::test_utils;
    use pretty_assertions::assert_eq;

    #[test]
    fn assignability_is_reflexive_and_transitive() {
        let universe = test_utils::java_ish_universe();
        let object = universe.lookup("Object").unwrap();
        let number = universe.lookup("Number").unwrap();
        let integer = universe.lookup("Integer").unwrap();
        let string = universe.lookup("String").unwrap();

        assert!(universe.can_assign_to(integer, integer));
        assert!(universe.can_assign_to(integer, number));
        assert!(universe.can_assign_to(integer, object));
        assert!(!universe.can_assign_to(number, integer));
        assert!(!universe.can_assign_to(string, number));
    }

    #[test]
    fn closures_exclude_the_base_type() {
        let universe = test_utils::java_ish_universe();
        let number = universe.lookup("Number").unwrap();
        let integer = universe.lookup("Integer").unwrap();
        let object = universe.lookup("Object").unwrap();

        let supers = universe.all_super_types(integer);
        assert!(supers.contains(&number));
        assert!(supers.contains(&object));
        assert!(!supers.contains(&integer));

        let subs = universe.all_sub_types(number);
        assert!(subs.contains(&integer));
        assert!(!subs.contains(&number));
    }

    #[test]
    fn definition_from_json_builds_a_universe() {
        let def: HierarchyDefinition = serde_json::from_str(
            r#"{
                "extends_relations": [
                    ["Integer", "Number"],
                    ["Number", "Object"],
                    ["ArrayList", "List"],
                    ["List", "Object"]
                ],
                "root_handle": "Object",
                "arities": { "List": 1, "ArrayList": 1 }
            }"#,
        )
        .unwrap();
        let universe = def.build().unwrap();
        assert_eq!(universe.len(), 5);
        let list = universe.lookup("List").unwrap();
        assert_eq!(universe.arity(list), 1);
        let array_list = universe.lookup("ArrayList").unwrap();
        assert!(universe.can_assign_to(array_list, universe.root()));
    }

    #[test]
    fn unrooted_definition_is_rejected() {
        let def = HierarchyDefinition::new(
            vec![("A".to_owned(), "B".to_owned())],
            "Root".to_owned(),
            Default::default(),
        );
        assert!(def.build().is_err());
    }
}
