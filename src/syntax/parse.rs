//! Surface parser for programs and queries.
//!
//! The surface grammar is deliberately small: facts (`p(a).`), rules
//! (`h :- g1, g2.`), queries (`?- g1, g2.`), structures, `[a, b | T]` list
//! sugar and `_` wildcards. There is no integer cell tag in the data model,
//! so a numeral is just an atom interned by its text.

use chumsky::prelude::*;

/// Un-interned surface term. Variable/atom classification follows the usual
/// rule: an identifier starting with an uppercase letter or `_` is a
/// variable, and `_` alone is a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ast {
    Wildcard,
    Var(String),
    Atom(String),
    Struct(String, Vec<Ast>),
    Nil,
    Pair(Box<Ast>, Box<Ast>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstClause {
    /// `None` for a query.
    pub head: Option<Ast>,
    pub body: Vec<Ast>,
}

pub fn term_parser() -> impl Parser<char, Ast, Error = Simple<char>> + Clone {
    recursive(|term| {
        let ident = text::ident::<char, Simple<char>>();

        let int = just('-')
            .or_not()
            .then(text::int(10))
            .map(|(sign, digits): (Option<char>, String)| {
                let text = match sign {
                    Some(_) => format!("-{digits}"),
                    None => digits,
                };
                Ast::Atom(text)
            });

        let strct = ident
            .clone()
            .then(
                term.clone()
                    .padded()
                    .separated_by(just(','))
                    .at_least(1)
                    .delimited_by(just('('), just(')')),
            )
            .map(|(name, args)| Ast::Struct(name, args));

        let var_or_atom = ident.map(|name: String| {
            let first = name.chars().next().unwrap();
            if first.is_uppercase() || first == '_' {
                if name == "_" {
                    Ast::Wildcard
                } else {
                    Ast::Var(name)
                }
            } else {
                Ast::Atom(name)
            }
        });

        let list = term
            .clone()
            .padded()
            .separated_by(just(','))
            .then(just('|').ignore_then(term.clone().padded()).or_not())
            .delimited_by(just('['), just(']'))
            .map(|(items, tail): (Vec<Ast>, Option<Ast>)| {
                items
                    .into_iter()
                    .rev()
                    .fold(tail.unwrap_or(Ast::Nil), |tail, head| {
                        Ast::Pair(Box::new(head), Box::new(tail))
                    })
            });

        strct.or(int).or(var_or_atom).or(list).padded()
    })
}

pub fn program_parser() -> impl Parser<char, Vec<AstClause>, Error = Simple<char>> {
    let term = term_parser();

    let goals = term.clone().separated_by(just(',').padded()).at_least(1);

    let query = just("?-")
        .padded()
        .ignore_then(goals.clone())
        .map(|body| AstClause { head: None, body });

    let clause = term
        .then(just(":-").padded().ignore_then(goals).or_not())
        .map(|(head, body)| AstClause {
            head: Some(head),
            body: body.unwrap_or_default(),
        });

    query
        .or(clause)
        .then_ignore(just('.').padded())
        .repeated()
        .then_ignore(end())
}

pub fn parse_program(src: &str) -> Result<Vec<AstClause>, Vec<Simple<char>>> {
    program_parser().parse(src)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn atom(s: &str) -> Ast {
        Ast::Atom(s.to_owned())
    }

    fn var(s: &str) -> Ast {
        Ast::Var(s.to_owned())
    }

    #[test]
    fn parses_fact_rule_and_query() {
        let clauses = parse_program("p(a). p(X) :- q(X, b). ?- p(Z).").unwrap();
        assert_eq!(clauses.len(), 3);
        assert_eq!(
            clauses[0],
            AstClause {
                head: Some(Ast::Struct("p".into(), vec![atom("a")])),
                body: vec![],
            }
        );
        assert_eq!(
            clauses[1],
            AstClause {
                head: Some(Ast::Struct("p".into(), vec![var("X")])),
                body: vec![Ast::Struct("q".into(), vec![var("X"), atom("b")])],
            }
        );
        assert_eq!(clauses[2].head, None);
    }

    #[test]
    fn parses_numerals_as_atoms() {
        let clauses = parse_program("c(1). c(-99).").unwrap();
        assert_eq!(
            clauses[0].head,
            Some(Ast::Struct("c".into(), vec![atom("1")]))
        );
        assert_eq!(
            clauses[1].head,
            Some(Ast::Struct("c".into(), vec![atom("-99")]))
        );
    }

    #[test]
    fn parses_lists() {
        let clauses = parse_program("p([a, b | T]). q([]).").unwrap();
        let expected = Ast::Pair(
            Box::new(atom("a")),
            Box::new(Ast::Pair(Box::new(atom("b")), Box::new(var("T")))),
        );
        assert_eq!(
            clauses[0].head,
            Some(Ast::Struct("p".into(), vec![expected]))
        );
        assert_eq!(clauses[1].head, Some(Ast::Struct("q".into(), vec![Ast::Nil])));
    }

    #[test]
    fn wildcard_is_not_a_named_variable() {
        let clauses = parse_program("p(_, _Tail).").unwrap();
        assert_eq!(
            clauses[0].head,
            Some(Ast::Struct(
                "p".into(),
                vec![Ast::Wildcard, var("_Tail")]
            ))
        );
    }

    #[test]
    fn atom_facts_parse_without_parens() {
        let clauses = parse_program("halt. run :- halt.").unwrap();
        assert_eq!(clauses[0].head, Some(atom("halt")));
        assert_eq!(clauses[1].body, vec![atom("halt")]);
    }
}
