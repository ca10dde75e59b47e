//! A small selector dialect: tag, `#id`, `.class`, `[attr]`, `[attr="v"]`,
//! `:not([attr="v"])`, the descendant combinator and `,` groups.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use serde::{Deserialize, Serialize};

use crate::error::{AnnotatorError, Result};
use crate::tree::{HostTree, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrTest {
    Exists(String),
    Equals(String, String),
}

impl AttrTest {
    fn matches(&self, tree: &dyn HostTree, node: NodeId) -> bool {
        match self {
            AttrTest::Exists(name) => tree.attribute(node, name).is_some(),
            AttrTest::Equals(name, value) => tree.attribute(node, name) == Some(value.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
    negated: Vec<AttrTest>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.negated.is_empty()
    }

    fn matches(&self, tree: &dyn HostTree, node: NodeId) -> bool {
        if !tree.is_element(node) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if tree.tag_name(node) != Some(tag.as_str()) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if tree.attribute(node, "id") != Some(id.as_str()) {
                return false;
            }
        }
        self.classes.iter().all(|class| tree.has_class(node, class))
            && self.attrs.iter().all(|test| test.matches(tree, node))
            && !self.negated.iter().any(|test| test.matches(tree, node))
    }
}

/// Parsed selector. Serializes as its source text.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    source: String,
    alternatives: Vec<Vec<Compound>>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let alternatives = parse_alternatives(source).map_err(|reason| AnnotatorError::Selector {
            selector: source.to_string(),
            reason,
        })?;
        Ok(Self {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, tree: &dyn HostTree, node: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|chain| chain_matches(chain, tree, node))
    }

    /// Nearest inclusive ancestor matching the selector.
    pub fn closest(&self, tree: &dyn HostTree, node: NodeId) -> Option<NodeId> {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if self.matches(tree, current) {
                return Some(current);
            }
            cursor = tree.parent(current);
        }
        None
    }

    /// All matches in `scope`'s subtree, scope included, in document order.
    pub fn query_all(&self, tree: &dyn HostTree, scope: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![scope];
        while let Some(node) = stack.pop() {
            if self.matches(tree, node) {
                found.push(node);
            }
            stack.extend(tree.children(node).into_iter().rev());
        }
        found
    }

    /// First match in `scope`'s subtree in document order.
    pub fn query(&self, tree: &dyn HostTree, scope: NodeId) -> Option<NodeId> {
        let mut stack = vec![scope];
        while let Some(node) = stack.pop() {
            if self.matches(tree, node) {
                return Some(node);
            }
            stack.extend(tree.children(node).into_iter().rev());
        }
        None
    }
}

fn chain_matches(chain: &[Compound], tree: &dyn HostTree, node: NodeId) -> bool {
    let Some((last, rest)) = chain.split_last() else {
        return false;
    };
    if !last.matches(tree, node) {
        return false;
    }
    let mut cursor = tree.parent(node);
    for compound in rest.iter().rev() {
        loop {
            let Some(ancestor) = cursor else {
                return false;
            };
            cursor = tree.parent(ancestor);
            if compound.matches(tree, ancestor) {
                break;
            }
        }
    }
    true
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({:?})", self.source)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Selector {
    type Error = AnnotatorError;

    fn try_from(source: String) -> Result<Self> {
        Selector::parse(&source)
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.source
    }
}

impl std::str::FromStr for Selector {
    type Err = AnnotatorError;

    fn from_str(source: &str) -> Result<Self> {
        Selector::parse(source)
    }
}

type Parse<T> = std::result::Result<T, String>;

fn parse_alternatives(source: &str) -> Parse<Vec<Vec<Compound>>> {
    let mut chars = source.chars().peekable();
    let mut alternatives = Vec::new();
    let mut chain = Vec::new();

    loop {
        skip_whitespace(&mut chars);
        match chars.peek() {
            None => break,
            Some(',') => {
                chars.next();
                if chain.is_empty() {
                    return Err("empty selector before `,`".to_string());
                }
                alternatives.push(std::mem::take(&mut chain));
            }
            Some(_) => chain.push(parse_compound(&mut chars)?),
        }
    }

    if chain.is_empty() {
        return Err("empty selector".to_string());
    }
    alternatives.push(chain);
    Ok(alternatives)
}

fn parse_compound(chars: &mut Peekable<Chars<'_>>) -> Parse<Compound> {
    let mut compound = Compound::default();

    match chars.peek() {
        Some('*') => {
            chars.next();
        }
        Some(&c) if is_ident_char(c) => {
            compound.tag = Some(read_ident(chars).to_ascii_lowercase());
        }
        _ => {}
    }

    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                chars.next();
                compound.id = Some(expect_ident(chars, "`#`")?);
            }
            '.' => {
                chars.next();
                compound.classes.push(expect_ident(chars, "`.`")?);
            }
            '[' => {
                chars.next();
                compound.attrs.push(parse_attr(chars)?);
            }
            ':' => {
                chars.next();
                let pseudo = read_ident(chars);
                if pseudo != "not" {
                    return Err(format!("unsupported pseudo-class `:{pseudo}`"));
                }
                expect_char(chars, '(')?;
                expect_char(chars, '[')?;
                compound.negated.push(parse_attr(chars)?);
                expect_char(chars, ')')?;
            }
            ',' => break,
            c if c.is_whitespace() => break,
            other => return Err(format!("unexpected character `{other}`")),
        }
    }

    if compound.is_empty() {
        return Err("empty compound selector".to_string());
    }
    Ok(compound)
}

/// Parses the inside of `[...]`, the opening bracket already consumed.
fn parse_attr(chars: &mut Peekable<Chars<'_>>) -> Parse<AttrTest> {
    let name = expect_ident(chars, "`[`")?;
    match chars.next() {
        Some(']') => Ok(AttrTest::Exists(name)),
        Some('=') => {
            let value = match chars.peek() {
                Some(&quote) if quote == '"' || quote == '\'' => {
                    chars.next();
                    let mut value = String::new();
                    loop {
                        match chars.next() {
                            Some(c) if c == quote => break,
                            Some(c) => value.push(c),
                            None => return Err("unterminated attribute value".to_string()),
                        }
                    }
                    value
                }
                _ => expect_ident(chars, "`=`")?,
            };
            expect_char(chars, ']')?;
            Ok(AttrTest::Equals(name, value))
        }
        Some(other) => Err(format!("unexpected `{other}` in attribute selector")),
        None => Err("unterminated attribute selector".to_string()),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if !is_ident_char(c) {
            break;
        }
        ident.push(c);
        chars.next();
    }
    ident
}

fn expect_ident(chars: &mut Peekable<Chars<'_>>, after: &str) -> Parse<String> {
    let ident = read_ident(chars);
    if ident.is_empty() {
        return Err(format!("expected identifier after {after}"));
    }
    Ok(ident)
}

fn expect_char(chars: &mut Peekable<Chars<'_>>, expected: char) -> Parse<()> {
    match chars.next() {
        Some(c) if c == expected => Ok(()),
        Some(c) => Err(format!("expected `{expected}`, found `{c}`")),
        None => Err(format!("expected `{expected}`, found end of input")),
    }
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MemoryTree, NodeSpec};

    fn tree() -> MemoryTree {
        MemoryTree::from_specs(&[NodeSpec::new("div").with_id("root").with_children([
            NodeSpec::new("div")
                .with_class("MessageList custom-scroll")
                .with_children([
                    NodeSpec::new("div")
                        .with_class("Message own")
                        .with_attr("id", "message-1"),
                    NodeSpec::new("div")
                        .with_class("Message service-message")
                        .with_attr("data-accessible-message", "true"),
                ]),
            NodeSpec::new("button")
                .with_attr("aria-label", "Go to next mention")
                .with_text("@"),
        ])])
        .unwrap()
    }

    #[test]
    fn test_compound_and_descendant() {
        let tree = tree();
        let sel = Selector::parse("#root .MessageList .Message.own").unwrap();
        let found = sel.query_all(&tree, tree.document());
        assert_eq!(found.len(), 1);
        assert_eq!(tree.attribute(found[0], "id"), Some("message-1"));
    }

    #[test]
    fn test_attribute_value_with_spaces() {
        let tree = tree();
        let sel = Selector::parse(r#"button[aria-label="Go to next mention"]"#).unwrap();
        assert!(sel.query(&tree, tree.document()).is_some());
        let sel = Selector::parse(r#"button[aria-label='Go to next unread reactions']"#).unwrap();
        assert!(sel.query(&tree, tree.document()).is_none());
    }

    #[test]
    fn test_negated_attribute() {
        let tree = tree();
        let sel = Selector::parse(r#".Message:not([data-accessible-message="true"])"#).unwrap();
        assert_eq!(sel.query_all(&tree, tree.document()).len(), 1);
    }

    #[test]
    fn test_groups_and_document_order() {
        let tree = tree();
        let sel = Selector::parse("button, .Message").unwrap();
        let found = sel.query_all(&tree, tree.document());
        assert_eq!(found.len(), 3);
        assert_eq!(tree.tag_name(found[2]), Some("button"));
    }

    #[test]
    fn test_closest_is_inclusive() {
        let tree = tree();
        let message = tree.find(".Message.own").unwrap().unwrap();
        let list = Selector::parse(".MessageList").unwrap();
        assert_eq!(
            list.closest(&tree, message),
            tree.find(".MessageList").unwrap()
        );
        let own = Selector::parse(".own").unwrap();
        assert_eq!(own.closest(&tree, message), Some(message));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "  ", ".", "#", "[x", "div:hover", "a,,b", "[x=\"y]"] {
            assert!(Selector::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let sel: Selector = serde_json::from_str(r#"".ChatInfo .status""#).unwrap();
        assert_eq!(sel.as_str(), ".ChatInfo .status");
        assert_eq!(serde_json::to_string(&sel).unwrap(), r#"".ChatInfo .status""#);
        assert!(serde_json::from_str::<Selector>(r#""::bad""#).is_err());
    }
}
