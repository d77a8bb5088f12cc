//! Constraint variables and the directed assignability constraints between
//! them, plus a small textual notation for writing constraint sets down
//! (used by tests and debugging tools; the solver itself is fed in-memory).

use std::collections::BTreeSet;
use std::fmt::{Display, Write};
use std::num::ParseIntError;
use std::ops::Deref;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{alphanumeric1, digit1, space0};
use nom::combinator::{map, map_res};
use nom::multi::{many0, separated_list0};
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::hierarchy::TypeId;

/// Identifies a constraint variable within its
/// [ConstraintModel](crate::model::ConstraintModel)'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableIndex(pub u32);

impl VariableIndex {
    /// The arena slot this index refers to.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for VariableIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('v')?;
        write!(f, "{}", self.0)
    }
}

/// Identifies the compilation unit a variable originates from. Output maps
/// are grouped by this identity so the downstream rewriter can batch edits
/// per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompilationUnitId(pub u32);

impl Display for CompilationUnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cu{}", self.0)
    }
}

/// What kind of program element a constraint variable stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableKind {
    /// A plain expression or declaration.
    Expression,
    /// The element slot at `position` of the parametric type flowing through
    /// `enclosing` (e.g. the `T` in a raw `List`).
    CollectionElement {
        /// The variable whose type owns this element slot.
        enclosing: VariableIndex,
        /// Which type parameter this slot fills, 0-based.
        position: usize,
    },
    /// A cast expression. The cast becomes removable when the operand's
    /// chosen type is already assignable to `target`.
    Cast {
        /// The variable standing for the cast's operand expression.
        operand: VariableIndex,
        /// The type the cast asserts.
        target: TypeId,
    },
    /// A bounded type parameter that is not tied to any concrete declaration.
    IndependentTypeVariable {
        /// Declared upper bounds of the type parameter.
        bounds: Vec<TypeId>,
    },
}

/// A symbolic placeholder for a program element whose generic type argument
/// is being inferred.
#[derive(Debug, Clone)]
pub struct Variable {
    /// The variant of program element this variable stands for.
    pub kind: VariableKind,
    /// The declared (raw) type of the element, if the source declares one.
    pub declared_type: Option<TypeId>,
    /// The compilation unit the element lives in; `None` for synthetic
    /// variables.
    pub origin: Option<CompilationUnitId>,
    /// The concrete type selected for this variable once the solver has run.
    pub chosen_type: Option<TypeId>,
    /// Display label; either a user-supplied name or a synthesized one.
    pub label: String,
}

impl Variable {
    /// Creates a plain expression variable.
    pub fn new(label: String) -> Variable {
        Variable {
            kind: VariableKind::Expression,
            declared_type: None,
            origin: None,
            chosen_type: None,
            label,
        }
    }

    /// Creates a plain expression variable with a declared type.
    pub fn with_declared_type(label: String, ty: TypeId) -> Variable {
        Variable {
            declared_type: Some(ty),
            ..Variable::new(label)
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

/// A directed assignability requirement `lhs <= rhs`: every value the left
/// variable can denote must be assignable wherever the right variable's
/// values are expected. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubtypeConstraint {
    /// The left hand side of the constraint.
    pub lhs: VariableIndex,
    /// The right hand side of the constraint.
    pub rhs: VariableIndex,
}

impl SubtypeConstraint {
    /// Creates a constraint requiring `lhs` to be assignable to `rhs`.
    pub fn new(lhs: VariableIndex, rhs: VariableIndex) -> SubtypeConstraint {
        SubtypeConstraint { lhs, rhs }
    }
}

impl Display for SubtypeConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <= {}", self.lhs, self.rhs)
    }
}

/// An ordered, deduplicated collection of [SubtypeConstraint].
#[derive(Debug, Default)]
pub struct ConstraintSet(BTreeSet<SubtypeConstraint>);

impl ConstraintSet {
    /// Inserts a constraint, returning whether it was new.
    pub fn insert(&mut self, cons: SubtypeConstraint) -> bool {
        self.0.insert(cons)
    }
}

impl Deref for ConstraintSet {
    type Target = BTreeSet<SubtypeConstraint>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<BTreeSet<SubtypeConstraint>> for ConstraintSet {
    fn from(set: BTreeSet<SubtypeConstraint>) -> Self {
        ConstraintSet(set)
    }
}

/// A term of the textual notation: a base variable name followed by a path
/// of element positions, e.g. `xs.0` for the first element slot of `xs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTerm {
    /// The base variable's name.
    pub name: String,
    /// Element positions applied in order to the base variable.
    pub path: Vec<usize>,
}

/// A parsed `lhs <= rhs` line of the textual notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConstraint {
    /// The left hand term.
    pub lhs: ParsedTerm,
    /// The right hand term.
    pub rhs: ParsedTerm,
}

/// Parses a base variable name.
pub fn parse_variable_name(input: &str) -> IResult<&str, String> {
    map(alphanumeric1, |s: &str| s.to_owned())(input)
}

fn parse_element_path(input: &str) -> IResult<&str, Vec<usize>> {
    many0(map_res::<_, _, _, _, ParseIntError, _, _>(
        preceded(tag("."), digit1),
        |d: &str| d.parse(),
    ))(input)
}

/// Parses a term of the form `name(.N)*`.
pub fn parse_term(input: &str) -> IResult<&str, ParsedTerm> {
    map(
        tuple((parse_variable_name, parse_element_path)),
        |(name, path)| ParsedTerm { name, path },
    )(input)
}

/// Parses one `lhs <= rhs` constraint.
pub fn parse_subtype_cons(input: &str) -> IResult<&str, ParsedConstraint> {
    let parser = tuple((parse_term, space0, tag("<="), space0, parse_term));
    map(parser, |(lhs, _, _, _, rhs)| ParsedConstraint { lhs, rhs })(input)
}

fn parse_whitespace_delim(input: &str) -> IResult<&str, &str> {
    preceded(
        alt((tag(" "), tag("\n"), tag("\t"), tag("\r\n"))),
        take_while(|x: char| x == ' ' || x == '\n' || x == '\t'),
    )(input)
}

/// Parses a whitespace/newline separated list of constraints.
pub fn parse_constraint_list(input: &str) -> IResult<&str, Vec<ParsedConstraint>> {
    separated_list0(parse_whitespace_delim, parse_subtype_cons)(input.trim())
}
