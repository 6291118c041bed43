//! The RDF abstract syntax the store operates on.
//!
//! Terms are a tagged sum of the six shapes the dictionary encoding
//! distinguishes. Two terms are equal iff their tag and components are equal;
//! no IRI validation, Unicode normalization or case folding is performed.

use std::fmt;

/// Well-known IRIs.
pub mod vocab {
    /// [RDF](https://www.w3.org/TR/rdf11-concepts/) vocabulary.
    pub mod rdf {
        /// The `rdf:type` predicate.
        pub const TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    }

    /// [XML Schema](https://www.w3.org/TR/xmlschema11-2/) datatypes.
    pub mod xsd {
        /// The `xsd:integer` datatype.
        pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
        /// The `xsd:string` datatype.
        pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    }
}

/// An RDF term: IRI, blank node, or one of the four literal shapes.
///
/// The default formatter returns an N-Triples compatible representation:
/// ```
/// use diomede::model::Term;
///
/// assert_eq!(
///     "<http://example.org/s>",
///     Term::iri("http://example.org/s").to_string()
/// );
/// assert_eq!("\"foo\\nbar\"", Term::string("foo\nbar").to_string());
/// assert_eq!(
///     "\"7\"^^<http://www.w3.org/2001/XMLSchema#integer>",
///     Term::integer(7).to_string()
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// A named node.
    Iri(String),
    /// A blank node, identified by its local id.
    Blank(String),
    /// A language-tagged string.
    LanguageLiteral {
        /// The lexical value.
        value: String,
        /// The language tag, kept exactly as given.
        language: String,
    },
    /// A plain `xsd:string` literal.
    StringLiteral(String),
    /// An `xsd:integer` literal with a machine value.
    IntegerLiteral(i64),
    /// A literal with an explicit datatype IRI.
    DatatypeLiteral {
        /// The lexical value.
        value: String,
        /// The datatype IRI.
        datatype: String,
    },
}

impl Term {
    /// Builds a named node.
    #[inline]
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri(value.into())
    }

    /// Builds a blank node from its local id.
    #[inline]
    pub fn blank(id: impl Into<String>) -> Self {
        Self::Blank(id.into())
    }

    /// Builds a language-tagged string.
    #[inline]
    pub fn language_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self::LanguageLiteral {
            value: value.into(),
            language: language.into(),
        }
    }

    /// Builds a plain string literal.
    #[inline]
    pub fn string(value: impl Into<String>) -> Self {
        Self::StringLiteral(value.into())
    }

    /// Builds an integer literal.
    #[inline]
    pub fn integer(value: i64) -> Self {
        Self::IntegerLiteral(value)
    }

    /// Builds a literal with an explicit datatype.
    #[inline]
    pub fn datatype_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::DatatypeLiteral {
            value: value.into(),
            datatype: datatype.into(),
        }
    }

    /// Is this term an IRI?
    #[inline]
    pub fn is_iri(&self) -> bool {
        matches!(self, Self::Iri(_))
    }

    /// Is this term a blank node?
    #[inline]
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Blank(_))
    }

    /// Is this term a literal of any shape?
    #[inline]
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Self::LanguageLiteral { .. }
                | Self::StringLiteral(_)
                | Self::IntegerLiteral(_)
                | Self::DatatypeLiteral { .. }
        )
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(iri) => write!(f, "<{iri}>"),
            Self::Blank(id) => write!(f, "_:{id}"),
            Self::LanguageLiteral { value, language } => {
                print_quoted_str(value, f)?;
                write!(f, "@{language}")
            }
            Self::StringLiteral(value) => print_quoted_str(value, f),
            Self::IntegerLiteral(value) => {
                write!(f, "\"{}\"^^<{}>", value, vocab::xsd::INTEGER)
            }
            Self::DatatypeLiteral { value, datatype } => {
                print_quoted_str(value, f)?;
                write!(f, "^^<{datatype}>")
            }
        }
    }
}

fn print_quoted_str(string: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("\"")?;
    for c in string.chars() {
        match c {
            '\u{08}' => f.write_str("\\b"),
            '\t' => f.write_str("\\t"),
            '\n' => f.write_str("\\n"),
            '\u{0C}' => f.write_str("\\f"),
            '\r' => f.write_str("\\r"),
            '"' => f.write_str("\\\""),
            '\\' => f.write_str("\\\\"),
            _ => fmt::Write::write_char(f, c),
        }?;
    }
    f.write_str("\"")
}

/// An RDF quad: (subject, predicate, object, graph).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Term,
}

impl Quad {
    #[inline]
    pub fn new(subject: Term, predicate: Term, object: Term, graph: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph,
        }
    }

    /// The four positions in SPOG order.
    #[inline]
    pub fn positions(&self) -> [&Term; 4] {
        [&self.subject, &self.predicate, &self.object, &self.graph]
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} .",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

/// A SPARQL-style variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(String);

impl Variable {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// One position of a [`QuadPattern`]: bound to a term or left variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermPattern {
    Term(Term),
    Variable(Variable),
}

impl TermPattern {
    /// Builds a variable position.
    #[inline]
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(Variable::new(name))
    }

    /// The bound term, if this position is bound.
    #[inline]
    pub fn as_term(&self) -> Option<&Term> {
        match self {
            Self::Term(term) => Some(term),
            Self::Variable(_) => None,
        }
    }

    /// The variable, if this position is unbound.
    #[inline]
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Self::Term(_) => None,
            Self::Variable(variable) => Some(variable),
        }
    }
}

impl From<Term> for TermPattern {
    #[inline]
    fn from(term: Term) -> Self {
        Self::Term(term)
    }
}

impl From<Variable> for TermPattern {
    #[inline]
    fn from(variable: Variable) -> Self {
        Self::Variable(variable)
    }
}

impl fmt::Display for TermPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term(term) => term.fmt(f),
            Self::Variable(variable) => variable.fmt(f),
        }
    }
}

/// A pattern over quads: each position is bound or a variable.
///
/// A pattern matches a quad iff every bound position equals the quad's term
/// and, for each variable name used in several positions, all those
/// positions hold the same term:
/// ```
/// use diomede::model::{Quad, QuadPattern, Term, TermPattern};
///
/// let s = Term::iri("http://example.org/s");
/// let p = Term::iri("http://example.org/p");
/// let g = Term::iri("http://example.org/g");
/// let quad = Quad::new(s.clone(), p, s, g.clone());
///
/// let pattern = QuadPattern::new(
///     TermPattern::variable("x"),
///     TermPattern::variable("p"),
///     TermPattern::variable("x"),
///     TermPattern::Term(g),
/// );
/// assert!(pattern.matches(&quad));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuadPattern {
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
    pub graph: TermPattern,
}

impl QuadPattern {
    #[inline]
    pub fn new(
        subject: impl Into<TermPattern>,
        predicate: impl Into<TermPattern>,
        object: impl Into<TermPattern>,
        graph: impl Into<TermPattern>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            graph: graph.into(),
        }
    }

    /// A pattern with four distinct variables, matching every quad.
    pub fn all() -> Self {
        Self::new(
            TermPattern::variable("subject"),
            TermPattern::variable("predicate"),
            TermPattern::variable("object"),
            TermPattern::variable("graph"),
        )
    }

    /// The four positions in SPOG order.
    #[inline]
    pub fn positions(&self) -> [&TermPattern; 4] {
        [&self.subject, &self.predicate, &self.object, &self.graph]
    }

    /// For each variable name used in more than one position, the positions
    /// it covers. The planner applies these equalities after the index scan;
    /// no index can enforce them.
    pub fn repeated_variables(&self) -> Vec<Vec<usize>> {
        let positions = self.positions();
        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        for (i, position) in positions.iter().enumerate() {
            if let Some(variable) = position.as_variable() {
                if let Some((_, group)) = groups.iter_mut().find(|(name, _)| *name == variable.name())
                {
                    group.push(i);
                } else {
                    groups.push((variable.name(), vec![i]));
                }
            }
        }
        groups
            .into_iter()
            .filter(|(_, group)| group.len() > 1)
            .map(|(_, group)| group)
            .collect()
    }

    /// Does this pattern match the given quad?
    pub fn matches(&self, quad: &Quad) -> bool {
        let quad_positions = quad.positions();
        for (pattern, term) in self.positions().iter().zip(quad_positions) {
            if let Some(bound) = pattern.as_term() {
                if bound != term {
                    return false;
                }
            }
        }
        for group in self.repeated_variables() {
            let first = quad_positions[group[0]];
            if group[1..].iter().any(|i| quad_positions[*i] != first) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for QuadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} .",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_display() {
        assert_eq!("_:b0", Term::blank("b0").to_string());
        assert_eq!("\"a\\\"b\"", Term::string("a\"b").to_string());
        assert_eq!("\"chat\"@fr", Term::language_literal("chat", "fr").to_string());
        assert_eq!(
            "\"1.5\"^^<http://www.w3.org/2001/XMLSchema#decimal>",
            Term::datatype_literal("1.5", "http://www.w3.org/2001/XMLSchema#decimal").to_string()
        );
    }

    #[test]
    fn structural_equality_only() {
        // No normalization: these are distinct terms.
        assert_ne!(Term::string("7"), Term::integer(7));
        assert_ne!(
            Term::iri("http://example.org/A"),
            Term::iri("http://example.org/a")
        );
    }

    #[test]
    fn pattern_matches_bound_positions() {
        let s = Term::iri("http://example.org/s");
        let p = Term::iri("http://example.org/p");
        let o = Term::integer(7);
        let g = Term::iri("http://example.org/g");
        let quad = Quad::new(s.clone(), p.clone(), o, g.clone());

        let pattern = QuadPattern::new(
            s,
            TermPattern::variable("p"),
            TermPattern::variable("o"),
            g.clone(),
        );
        assert!(pattern.matches(&quad));

        let miss = QuadPattern::new(
            Term::iri("http://example.org/other"),
            TermPattern::variable("p"),
            TermPattern::variable("o"),
            g,
        );
        assert!(!miss.matches(&quad));
    }

    #[test]
    fn pattern_repeated_variables() {
        let s = Term::iri("http://example.org/s");
        let g = Term::iri("http://example.org/g");
        let quad = Quad::new(s.clone(), g.clone(), s.clone(), g.clone());

        // subject == object
        let so = QuadPattern::new(
            TermPattern::variable("x"),
            TermPattern::variable("p"),
            TermPattern::variable("x"),
            TermPattern::variable("g"),
        );
        assert!(so.matches(&quad));

        // subject == predicate does not hold
        let sp = QuadPattern::new(
            TermPattern::variable("x"),
            TermPattern::variable("x"),
            TermPattern::variable("o"),
            TermPattern::variable("g"),
        );
        assert!(!sp.matches(&quad));

        // predicate == graph holds
        let pg = QuadPattern::new(
            TermPattern::variable("s"),
            TermPattern::variable("x"),
            TermPattern::variable("o"),
            TermPattern::variable("x"),
        );
        assert!(pg.matches(&quad));
    }
}
