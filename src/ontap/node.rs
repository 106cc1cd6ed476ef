//! Request/response trees for the ONTAP management protocol.
//!
//! Every request and response is a tree of named elements with text
//! content. Requests are assembled child by child and serialized to XML;
//! responses are parsed back into the same shape so collectors can walk
//! them without caring about the wire encoding.

use crate::error::{AgentError, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    name: String,
    content: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Node {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn new_with(name: &str, content: &str) -> Self {
        Node {
            name: name.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn set_content(&mut self, content: &str) {
        self.content = content.to_string();
    }

    /// Response-side only: element attributes (e.g. `status` on results).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn push_attr(&mut self, name: String, value: String) {
        self.attrs.push((name, value));
    }

    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Append a named child and return a handle to it.
    pub fn new_child(&mut self, name: &str, content: &str) -> &mut Node {
        self.children.push(Node::new_with(name, content));
        self.children.last_mut().unwrap()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Content of the first child with this name; `None` when the child
    /// is absent or empty.
    pub fn child_content(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.content.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Upsert the content of a named child.
    pub fn set_child_content(&mut self, name: &str, content: &str) {
        match self.child_mut(name) {
            Some(child) => child.set_content(content),
            None => {
                self.new_child(name, content);
            }
        }
    }

    /// Remove and return the first child with this name.
    pub fn pop_child(&mut self, name: &str) -> Option<Node> {
        let pos = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(pos))
    }

    /// All nodes reachable through the given chain of element names,
    /// starting the chain at any depth.
    pub fn search_children(&self, path: &[&str]) -> Vec<&Node> {
        let mut found = Vec::new();
        self.search_into(path, &mut found);
        found
    }

    fn search_into<'a>(&'a self, path: &[&str], found: &mut Vec<&'a Node>) {
        if path.is_empty() {
            return;
        }
        for child in &self.children {
            if child.name == path[0] {
                if path.len() == 1 {
                    found.push(child);
                } else {
                    child.search_into(&path[1..], found);
                }
            } else {
                child.search_into(path, found);
            }
        }
    }

    // --- XML encoding ---

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_element(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))
    }

    fn write_element(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        writer.write_event(Event::Start(BytesStart::new(self.name.as_str())))?;
        if !self.content.is_empty() {
            writer.write_event(Event::Text(BytesText::new(self.content.as_str())))?;
        }
        for child in &self.children {
            child.write_element(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }

    pub fn from_xml(xml: &str) -> Result<Node> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Node> = Vec::new();
        let mut root: Option<Node> = None;

        loop {
            match reader.read_event().map_err(AgentError::Xml)? {
                Event::Start(e) => {
                    let mut node = Node::new(&String::from_utf8_lossy(e.name().as_ref()));
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = String::from_utf8_lossy(&attr.value).into_owned();
                        node.push_attr(key, value);
                    }
                    stack.push(node);
                }
                Event::Empty(e) => {
                    let mut node = Node::new(&String::from_utf8_lossy(e.name().as_ref()));
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = String::from_utf8_lossy(&attr.value).into_owned();
                        node.push_attr(key, value);
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.add_child(node),
                        None => root = Some(node),
                    }
                }
                Event::Text(e) => {
                    if let Some(node) = stack.last_mut() {
                        node.content = e
                            .unescape()
                            .map_err(|e| AgentError::Parse(e.to_string()))?
                            .into_owned();
                    }
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| AgentError::InvalidResponse("unbalanced XML".into()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.add_child(node),
                        None => root = Some(node),
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        root.ok_or_else(|| AgentError::InvalidResponse("empty XML document".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_walk() {
        let mut request = Node::new("perf-object-get-instances");
        request.new_child("objectname", "volume");
        let counters = request.new_child("counters", "");
        counters.new_child("counter", "read_ops");
        counters.new_child("counter", "write_ops");

        assert_eq!(request.child_content("objectname"), Some("volume"));
        assert_eq!(request.child("counters").unwrap().children().len(), 2);
    }

    #[test]
    fn pop_and_replace_child() {
        let mut request = Node::new("r");
        request.new_child("instance-uuids", "").new_child("instance-uuid", "a");
        assert!(request.pop_child("instance-uuids").is_some());
        assert!(request.pop_child("instance-uuids").is_none());
        request.new_child("instance-uuids", "").new_child("instance-uuid", "b");
        let uuids = request.child("instance-uuids").unwrap();
        assert_eq!(uuids.children()[0].content(), "b");
    }

    #[test]
    fn xml_round_trip() {
        let mut request = Node::new("perf-object-counter-list-info");
        request.new_child("objectname", "aggregate");
        let xml = request.to_xml().unwrap();
        let parsed = Node::from_xml(&xml).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn parse_attributes_and_entities() {
        let node = Node::from_xml(
            r#"<results status="passed"><labels><l>queue_0,queue_1 &amp; up</l></labels></results>"#,
        )
        .unwrap();
        assert_eq!(node.attr("status"), Some("passed"));
        let label = &node.child("labels").unwrap().children()[0];
        assert_eq!(label.content(), "queue_0,queue_1 & up");
    }

    #[test]
    fn search_nested_path() {
        let doc = Node::from_xml(
            "<results><shelf-environ-channel-info><shelf-environ-shelf-list>\
             <shelf-environ-shelf-info><shelf-id>1</shelf-id></shelf-environ-shelf-info>\
             <shelf-environ-shelf-info><shelf-id>2</shelf-id></shelf-environ-shelf-info>\
             </shelf-environ-shelf-list></shelf-environ-channel-info></results>",
        )
        .unwrap();
        let shelves = doc.search_children(&[
            "shelf-environ-channel-info",
            "shelf-environ-shelf-list",
            "shelf-environ-shelf-info",
        ]);
        assert_eq!(shelves.len(), 2);
        assert_eq!(shelves[1].child_content("shelf-id"), Some("2"));
    }
}
