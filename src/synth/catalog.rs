//! The construct catalog: every way the synthesizer knows to build a value

use crate::synth::expr::Precedence;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of value a construct produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueTag {
    /// Any expression evaluating to a string
    String,
    /// Literal string syntax
    StringToken,
    Integer,
    /// A name from the template context
    Global,
    /// Attribute of an object
    Attribute,
    /// Item of a mapping
    Item,
    CallResult,
    Grouping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstructId {
    StrTokens,
    StrTildeConcat,
    StrPlusConcat,
    StrJoinTuple,
    StrDictJoin,
    StrLowerFilter,
    StrReverseFilter,
    StrFromInt,
    StrCharFormat,
    StrCharFromRepr,
    TokenSingleQuote,
    TokenDoubleQuote,
    TokenAdjacent,
    IntLiteral,
    IntAdd,
    IntLength,
    GlobalName,
    AttrDot,
    AttrSubscript,
    AttrFilter,
    AttrFilterComma,
    AttrMapFirst,
    AttrMapLast,
    ItemDot,
    ItemSubscript,
    ItemGetCall,
    ItemDunderGetitem,
    CallParen,
    Parens,
}

impl fmt::Display for ConstructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An atomic way to express a value
#[derive(Debug)]
pub struct Construct {
    pub id: ConstructId,
    pub tag: ValueTag,
    /// Rendering template; `{N}` is slot N, `{args}` is slots 1.. joined by commas
    pub template: &'static str,
    /// Characters the template itself consumes
    pub chars: &'static str,
    /// Keywords the template itself consumes
    pub keywords: &'static [&'static str],
    /// Number of sub-expression slots (calls take a variable number)
    pub arity: usize,
    /// Preference tier, lower is tried first
    pub score: u8,
    /// Precedence of the result; `None` inherits slot 0's
    pub precedence: Option<Precedence>,
    pub example: &'static str,
}

const fn entry(
    id: ConstructId,
    tag: ValueTag,
    template: &'static str,
    chars: &'static str,
    keywords: &'static [&'static str],
    arity: usize,
    score: u8,
    precedence: Option<Precedence>,
    example: &'static str,
) -> Construct {
    Construct {
        id,
        tag,
        template,
        chars,
        keywords,
        arity,
        score,
        precedence,
        example,
    }
}

use ConstructId as C;
use Precedence as P;
use ValueTag as T;

/// Indexed by `ConstructId` discriminant
pub static CATALOG: &[Construct] = &[
    entry(C::StrTokens, T::String, "{0}", "", &[], 1, 0, None, "'abc'"),
    entry(C::StrTildeConcat, T::String, "{0}~{1}", "~", &[], 2, 1, Some(P::Concat), "'ab'~'c'"),
    entry(C::StrPlusConcat, T::String, "{0}+{1}", "+", &[], 2, 1, Some(P::Sum), "'ab'+'c'"),
    entry(C::StrJoinTuple, T::String, "({0},{1})|join", "(),|", &["join"], 2, 2, Some(P::Filter), "('ab','c')|join"),
    entry(C::StrDictJoin, T::String, "dict({0}=1)|join", "()=1|", &["dict", "join"], 1, 2, Some(P::Filter), "dict(abc=1)|join"),
    entry(C::StrLowerFilter, T::String, "{0}|lower", "|", &["lower"], 1, 3, Some(P::Filter), "'ABC'|lower"),
    entry(C::StrReverseFilter, T::String, "{0}|reverse", "|", &["reverse"], 1, 3, Some(P::Filter), "'cba'|reverse"),
    entry(C::StrFromInt, T::String, "{0}|string", "|", &["string"], 1, 3, Some(P::Filter), "123|string"),
    entry(C::StrCharFormat, T::String, "'%c'%{0}", "'%c", &[], 1, 4, Some(P::Product), "'%c'%97"),
    entry(C::StrCharFromRepr, T::String, "({0}|string)[{1}]", "()|[]", &["string"], 2, 4, Some(P::Postfix), "(lipsum|string)[11]"),
    entry(C::TokenSingleQuote, T::StringToken, "'{0}'", "'", &[], 1, 0, Some(P::Primary), "'abc'"),
    entry(C::TokenDoubleQuote, T::StringToken, "\"{0}\"", "\"", &[], 1, 0, Some(P::Primary), "\"abc\""),
    entry(C::TokenAdjacent, T::StringToken, "{0}{1}", "", &[], 2, 1, Some(P::Primary), "'ab''c'"),
    entry(C::IntLiteral, T::Integer, "{0}", "", &[], 1, 0, Some(P::Primary), "42"),
    entry(C::IntAdd, T::Integer, "{0}+{1}", "+", &[], 2, 1, Some(P::Sum), "40+2"),
    entry(C::IntLength, T::Integer, "{0}|length", "|", &["length"], 1, 2, Some(P::Filter), "'xx'|length"),
    entry(C::GlobalName, T::Global, "{0}", "", &[], 1, 0, Some(P::Primary), "lipsum"),
    entry(C::AttrDot, T::Attribute, "{0}.{1}", ".", &[], 2, 0, Some(P::Postfix), "x.name"),
    entry(C::AttrSubscript, T::Attribute, "{0}[{1}]", "[]", &[], 2, 0, Some(P::Postfix), "x['name']"),
    entry(C::AttrFilter, T::Attribute, "{0}|attr({1})", "|()", &["attr"], 2, 1, Some(P::Filter), "x|attr('name')"),
    entry(C::AttrFilterComma, T::Attribute, "{0}|attr({1},)", "|(),", &["attr"], 2, 2, Some(P::Filter), "x|attr('name',)"),
    entry(C::AttrMapFirst, T::Attribute, "({0},)|map({1},{2})|first", "(),|", &["map", "first"], 3, 2, Some(P::Filter), "(x,)|map('attr','name')|first"),
    entry(C::AttrMapLast, T::Attribute, "({0},)|map({1},{2})|last", "(),|", &["map", "last"], 3, 2, Some(P::Filter), "(x,)|map('attr','name')|last"),
    entry(C::ItemDot, T::Item, "{0}.{1}", ".", &[], 2, 0, Some(P::Postfix), "x.key"),
    entry(C::ItemSubscript, T::Item, "{0}[{1}]", "[]", &[], 2, 0, Some(P::Postfix), "x['key']"),
    entry(C::ItemGetCall, T::Item, "{0}", "", &[], 1, 1, None, "x.get('key')"),
    entry(C::ItemDunderGetitem, T::Item, "{0}", "", &[], 1, 2, None, "x.__getitem__('key')"),
    entry(C::CallParen, T::CallResult, "{0}({args})", "()", &[], 1, 0, Some(P::Postfix), "f('arg')"),
    entry(C::Parens, T::Grouping, "({0})", "()", &[], 1, 0, Some(P::Primary), "('a'~'b')"),
];

/// Object reprs that expose characters to `StrCharFromRepr`, as
/// `(global name, leading text of its string form)`
pub static REPR_SOURCES: &[(&str, &str)] = &[
    ("lipsum", "<function generate_lorem_ipsum at 0x"),
    ("cycler", "<class 'jinja2.utils.Cycler'>"),
    ("joiner", "<class 'jinja2.utils.Joiner'>"),
    ("namespace", "<class 'jinja2.utils.Namespace'>"),
    ("dict", "<class 'dict'>"),
    ("range", "<class 'range'>"),
];

pub fn construct(id: ConstructId) -> &'static Construct {
    &CATALOG[id as usize]
}

/// Position in the catalog, the final tie-breaker between candidates
pub fn catalog_rank(id: ConstructId) -> usize {
    id as usize
}

/// Constructs producing `tag`, by preference score. Equal scores keep
/// catalog order.
pub fn list_constructs(tag: ValueTag) -> Vec<&'static Construct> {
    let mut constructs: Vec<&'static Construct> = CATALOG.iter().filter(|c| c.tag == tag).collect();
    constructs.sort_by_key(|c| c.score);
    constructs
}

/// Every keyword consumed by some construct
pub fn keywords() -> Vec<&'static str> {
    let mut words: Vec<&'static str> = CATALOG.iter().flat_map(|c| c.keywords.iter().copied()).collect();
    words.extend(REPR_SOURCES.iter().map(|(name, _)| *name));
    words.sort_unstable();
    words.dedup();
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_indexed_by_id() {
        for (i, c) in CATALOG.iter().enumerate() {
            assert_eq!(c.id as usize, i, "{} out of place", c.id);
            assert_eq!(construct(c.id).id, c.id);
        }
    }

    #[test]
    fn test_list_constructs_orders_by_score() {
        let strings = list_constructs(ValueTag::String);
        assert_eq!(strings[0].id, ConstructId::StrTokens);
        assert!(strings.windows(2).all(|w| w[0].score <= w[1].score));
        let concat: Vec<_> = strings.iter().filter(|c| c.score == 1).map(|c| c.id).collect();
        assert_eq!(concat, vec![ConstructId::StrTildeConcat, ConstructId::StrPlusConcat]);
    }

    #[test]
    fn test_grouping_is_not_offered_for_values() {
        assert!(list_constructs(ValueTag::String)
            .iter()
            .all(|c| c.id != ConstructId::Parens));
        assert_eq!(list_constructs(ValueTag::Grouping).len(), 1);
    }

    #[test]
    fn test_repr_sources_expose_common_letters() {
        let (name, repr) = REPR_SOURCES[0];
        assert_eq!(name, "lipsum");
        assert_eq!(repr.find('e'), Some(11));
    }
}
