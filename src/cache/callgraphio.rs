//! Binary encoding of call graphs.
//!
//! Nodes are written in creation order followed by the three site tables.
//! Per-node site index lists are not stored; they are rebuilt from the tables on
//! read, so a decoded graph answers every query exactly like the original.

use crate::{
    cache::{
        io::{Parser, Writer},
        SymbolTable,
    },
    callgraph::{
        CallGraph, CallGraphNode, CallGraphNodeId, CallSite, ClassAccessSite, FieldAccessSite,
    },
    model::{FieldReference, MethodDescriptor, MethodReference, TextLocation},
    Result,
};

const MAGIC: &[u8; 4] = b"AOTC";
const FORMAT_VERSION: u8 = 1;

/// Reads and writes call graphs against a pair of symbol tables.
#[derive(Debug, Clone, Copy)]
pub struct CallGraphIO<'a> {
    symbols: &'a SymbolTable,
    files: &'a SymbolTable,
}

impl<'a> CallGraphIO<'a> {
    /// Creates a codec using `symbols` for names and `files` for source files.
    #[must_use]
    pub fn new(symbols: &'a SymbolTable, files: &'a SymbolTable) -> Self {
        Self { symbols, files }
    }

    /// Encodes `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when a table exceeds the format limits.
    pub fn write(&self, graph: &CallGraph) -> Result<Vec<u8>> {
        let mut writer = Writer::new();
        writer.write_bytes(MAGIC);
        writer.write_le(FORMAT_VERSION);

        writer.write_index(graph.method_count())?;
        for node in graph.nodes() {
            writer.write_index(self.symbols.lookup(&node.method.class_name) as usize)?;
            writer.write_index(self.symbols.lookup(&node.method.descriptor.to_string()) as usize)?;
        }

        writer.write_index(graph.call_sites().len())?;
        for site in graph.call_sites() {
            writer.write_index(site.caller.index())?;
            writer.write_index(site.callee.index())?;
            self.write_location(&mut writer, site.location.as_ref())?;
        }

        writer.write_index(graph.field_accesses().len())?;
        for site in graph.field_accesses() {
            writer.write_index(site.method.index())?;
            writer.write_index(self.symbols.lookup(&site.field.class_name) as usize)?;
            writer.write_index(self.symbols.lookup(&site.field.field_name) as usize)?;
            self.write_location(&mut writer, site.location.as_ref())?;
        }

        writer.write_index(graph.class_accesses().len())?;
        for site in graph.class_accesses() {
            writer.write_index(site.method.index())?;
            writer.write_index(self.symbols.lookup(&site.class_name) as usize)?;
            self.write_location(&mut writer, site.location.as_ref())?;
        }
        Ok(writer.into_inner())
    }

    /// Decodes a graph written by [`CallGraphIO::write`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a wrong header, truncated data,
    /// node indices out of range or symbols missing from the tables.
    pub fn read(&self, data: &[u8]) -> Result<CallGraph> {
        let mut parser = Parser::new(data);
        if parser.read_bytes(MAGIC.len())? != MAGIC {
            return Err(malformed_error!("not a call graph blob"));
        }
        let version = parser.read_le::<u8>()?;
        if version != FORMAT_VERSION {
            return Err(malformed_error!(
                "unsupported call graph format version {}",
                version
            ));
        }

        let node_count = parser.read_index()?;
        let mut nodes = Vec::new();
        for _ in 0..node_count {
            let class_name = self.symbol(&mut parser)?.to_string();
            let descriptor = MethodDescriptor::parse(self.symbol(&mut parser)?)?;
            nodes.push(CallGraphNode::new(MethodReference::new(class_name, descriptor)));
        }

        let mut call_sites = Vec::new();
        for index in 0..parser.read_index()? {
            let caller = read_node(&mut parser, node_count)?;
            let callee = read_node(&mut parser, node_count)?;
            let location = self.read_location(&mut parser)?;
            nodes[caller.index()].call_sites.push(index);
            nodes[callee.index()].caller_call_sites.push(index);
            call_sites.push(CallSite {
                location,
                callee,
                caller,
            });
        }

        let mut field_accesses = Vec::new();
        for index in 0..parser.read_index()? {
            let method = read_node(&mut parser, node_count)?;
            let class_name = self.symbol(&mut parser)?.to_string();
            let field_name = self.symbol(&mut parser)?.to_string();
            let location = self.read_location(&mut parser)?;
            nodes[method.index()].field_access_sites.push(index);
            field_accesses.push(FieldAccessSite {
                location,
                method,
                field: FieldReference::new(class_name, field_name),
            });
        }

        let mut class_accesses = Vec::new();
        for index in 0..parser.read_index()? {
            let method = read_node(&mut parser, node_count)?;
            let class_name = self.symbol(&mut parser)?.to_string();
            let location = self.read_location(&mut parser)?;
            nodes[method.index()].class_access_sites.push(index);
            class_accesses.push(ClassAccessSite {
                location,
                method,
                class_name,
            });
        }

        Ok(CallGraph::from_tables(
            nodes,
            call_sites,
            field_accesses,
            class_accesses,
        ))
    }

    fn write_location(&self, writer: &mut Writer, location: Option<&TextLocation>) -> Result<()> {
        match location {
            Some(location) => {
                writer.write_optional_index(Some(self.files.lookup(&location.file) as usize))?;
                writer.write_7bit_encoded_int(location.line);
            }
            None => writer.write_optional_index(None)?,
        }
        Ok(())
    }

    fn read_location(&self, parser: &mut Parser<'_>) -> Result<Option<TextLocation>> {
        let Some(file) = parser.read_optional_index()? else {
            return Ok(None);
        };
        let file = u32::try_from(file)
            .ok()
            .and_then(|index| self.files.at(index))
            .ok_or_else(|| malformed_error!("file index {} is not in the file table", file))?;
        let line = parser.read_7bit_encoded_int()?;
        Ok(Some(TextLocation::new(file, line)))
    }

    fn symbol(&self, parser: &mut Parser<'_>) -> Result<&'a str> {
        let index = parser.read_7bit_encoded_int()?;
        self.symbols
            .at(index)
            .ok_or_else(|| malformed_error!("symbol {} is not in the symbol table", index))
    }
}

fn read_node(parser: &mut Parser<'_>, node_count: usize) -> Result<CallGraphNodeId> {
    let index = parser.read_index()?;
    if index >= node_count {
        return Err(malformed_error!(
            "call graph node {} out of range ({} nodes)",
            index,
            node_count
        ));
    }
    Ok(CallGraphNodeId(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValueType;

    fn method(class: &str, name: &str) -> MethodReference {
        MethodReference::new(class, MethodDescriptor::new(name, vec![], ValueType::Void))
    }

    #[test]
    fn test_round_trip_keeps_queries() {
        let (main, a, b) = (method("M", "main"), method("A", "run"), method("B", "run"));
        let mut graph = CallGraph::new();
        let main_id = graph.node_for(&main);
        graph.add_call_site(main_id, &a, Some(TextLocation::new("M.java", 4)));
        graph.add_call_site(main_id, &b, None);
        let a_id = graph.node_for(&a);
        graph.add_call_site(a_id, &a, Some(TextLocation::new("A.java", 9)));
        graph.add_field_access(a_id, &FieldReference::new("A", "count"), None);
        graph.add_class_access(main_id, "B", Some(TextLocation::new("M.java", 5)));

        let symbols = SymbolTable::new();
        let files = SymbolTable::new();
        let io = CallGraphIO::new(&symbols, &files);
        let decoded = io.read(&io.write(&graph).unwrap()).unwrap();

        assert_eq!(decoded.method_count(), 3);
        assert_eq!(decoded.call_sites(), graph.call_sites());
        assert_eq!(decoded.field_accesses(), graph.field_accesses());
        assert_eq!(decoded.class_accesses(), graph.class_accesses());
        assert_eq!(decoded.callees(&main), vec![a.clone(), b]);
        assert_eq!(decoded.callers(&a), graph.callers(&a));
        assert!(decoded.has_recursion());
        for (left, right) in decoded.nodes().zip(graph.nodes()) {
            assert_eq!(left, right);
        }
    }

    #[test]
    fn test_site_with_unknown_node_is_malformed() {
        let symbols = SymbolTable::new();
        let files = SymbolTable::new();
        let io = CallGraphIO::new(&symbols, &files);
        let mut graph = CallGraph::new();
        let caller = graph.node_for(&method("A", "f"));
        graph.add_call_site(caller, &method("B", "g"), None);
        let mut bytes = io.write(&graph).unwrap();
        // header(5) + node count + 2 nodes * 2 symbols + site count, then caller
        let caller_offset = 5 + 1 + 4 + 1;
        bytes[caller_offset] = 9;
        assert!(matches!(io.read(&bytes), Err(crate::Error::Malformed { .. })));
    }
}
