use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{CellError, Result};

/// We use the CNIC spec, as per: http://www.neuronland.org/NLMorphologyConverter/MorphologyFormats/SWC/Spec.html
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize)]
pub enum StructureIdentifier {
    Undefined,
    Soma,
    Axon,
    BasalDendrite,
    ApicalDendrite,
    ForkPoint,
    EndPoint,
    Custom(u8),
}

impl From<u8> for StructureIdentifier {
    fn from(v: u8) -> Self {
        match v {
            0 => StructureIdentifier::Undefined,
            1 => StructureIdentifier::Soma,
            2 => StructureIdentifier::Axon,
            3 => StructureIdentifier::BasalDendrite,
            4 => StructureIdentifier::ApicalDendrite,
            5 => StructureIdentifier::ForkPoint,
            6 => StructureIdentifier::EndPoint,
            other => StructureIdentifier::Custom(other),
        }
    }
}

impl From<StructureIdentifier> for u8 {
    fn from(v: StructureIdentifier) -> Self {
        match v {
            StructureIdentifier::Undefined => 0,
            StructureIdentifier::Soma => 1,
            StructureIdentifier::Axon => 2,
            StructureIdentifier::BasalDendrite => 3,
            StructureIdentifier::ApicalDendrite => 4,
            StructureIdentifier::ForkPoint => 5,
            StructureIdentifier::EndPoint => 6,
            StructureIdentifier::Custom(code) => code,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Node {
    pub node_id: u64,
    pub structured_identifier: StructureIdentifier,
    pub x_pos: f64,
    pub y_pos: f64,
    pub z_pos: f64,
    pub radius: f64,
    /// `None` for the root (`-1` in the file)
    pub parent_id: Option<u64>,
}

/// Controls how strictly an SWC file is read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Log a warning for every zero-radius point
    pub emit_warnings: bool,
    /// Fail on zero-radius points that are not end points
    pub strict: bool,
    /// Offset added to every coordinate (µm)
    pub shift: [f64; 3],
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            emit_warnings: true,
            strict: false,
            shift: [0.0, 0.0, 0.0],
        }
    }
}

/// A reconstructed tree, stored in breadth-first order from the root
#[derive(Debug, Clone)]
pub struct Morphology {
    nodes: Vec<Node>,
    index: HashMap<u64, usize>,
    children: HashMap<u64, Vec<u64>>,
}

impl Morphology {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn node(&self, node_id: u64) -> Option<&Node> {
        self.index.get(&node_id).map(|&i| &self.nodes[i])
    }

    pub fn parent(&self, node: &Node) -> Option<&Node> {
        node.parent_id.and_then(|p| self.node(p))
    }

    pub fn children(&self, node_id: u64) -> &[u64] {
        self.children.get(&node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn type_counts(&self) -> BTreeMap<StructureIdentifier, usize> {
        self.nodes
            .iter()
            .map(|node| node.structured_identifier)
            .counts()
            .into_iter()
            .collect()
    }

    /// Renders the sorted tree as SWC, renumbering nodes from 1 so every
    /// parent precedes its children
    pub fn to_swc_string(&self) -> String {
        let new_ids: HashMap<u64, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.node_id, i + 1))
            .collect();

        let mut output = String::from("# Processed SWC file\n");
        for node in &self.nodes {
            let parent_id = node
                .parent_id
                .and_then(|p| new_ids.get(&p))
                .map_or(-1i64, |&p| p as i64);
            let _ = writeln!(
                output,
                "{} {} {:.2} {:.2} {:.2} {} {}",
                new_ids[&node.node_id],
                u8::from(node.structured_identifier),
                node.x_pos,
                node.y_pos,
                node.z_pos,
                node.radius,
                parent_id
            );
        }
        output
    }

    pub fn write_swc(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_swc_string()).map_err(|source| CellError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

fn field<'a, T: std::str::FromStr>(
    fields: &mut impl Iterator<Item = &'a str>,
    line: usize,
    name: &str,
) -> Result<T> {
    let raw = fields.next().ok_or_else(|| CellError::Parse {
        line,
        reason: format!("missing {name}"),
    })?;
    raw.parse::<T>().map_err(|_| CellError::Parse {
        line,
        reason: format!("invalid {name}: {raw:?}"),
    })
}

fn parse_line(text: &str, line: usize, options: &ReaderOptions) -> Result<Node> {
    let mut fields = text.split_whitespace();
    let node_id: u64 = field(&mut fields, line, "node id")?;
    let type_code: u8 = field(&mut fields, line, "structure identifier")?;
    let x: f64 = field(&mut fields, line, "x")?;
    let y: f64 = field(&mut fields, line, "y")?;
    let z: f64 = field(&mut fields, line, "z")?;
    let radius: f64 = field(&mut fields, line, "radius")?;
    let parent_raw: i64 = field(&mut fields, line, "parent id")?;
    if fields.next().is_some() {
        debug!("Ignoring extra columns on line {}", line);
    }

    if radius < 0.0 || !radius.is_finite() {
        return Err(CellError::Parse {
            line,
            reason: format!("invalid radius: {radius}"),
        });
    }

    let parent_id = match parent_raw {
        -1 => None,
        p if p >= 0 => Some(p as u64),
        p => {
            return Err(CellError::Parse {
                line,
                reason: format!("invalid parent id: {p}"),
            });
        }
    };

    Ok(Node {
        node_id,
        structured_identifier: type_code.into(),
        x_pos: x + options.shift[0],
        y_pos: y + options.shift[1],
        z_pos: z + options.shift[2],
        radius,
        parent_id,
    })
}

/// Parses SWC text into a breadth-first sorted [`Morphology`]
///
/// Emits warnings for zero-radius points (which are then widened to a radius
/// of 1). In strict mode a zero-radius point that is not an end point is an
/// error instead.
///
/// For Flywire.ai skeletons, seems they only mark out:
/// # 0 = undefined, 1 = soma, 5 = fork point, 6 = end point
pub fn parse_swc(text: &str, options: &ReaderOptions) -> Result<Morphology> {
    let mut nodes_vec: Vec<Node> = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let node = parse_line(trimmed, i + 1, options)?;

        if node.radius == 0.0 {
            if options.emit_warnings {
                warn!(
                    "Zero-radius for section ID: {} of type: {:?}",
                    node.node_id, node.structured_identifier
                );
            }
            if options.strict && node.structured_identifier != StructureIdentifier::EndPoint {
                return Err(CellError::ZeroRadius(node.node_id));
            }
        }
        nodes_vec.push(node);
    }

    // Quick debug logs for the count of the types
    for (kind, count) in nodes_vec.iter().map(|n| n.structured_identifier).counts() {
        info!("{:?} - #{:?}", kind, count);
    }

    let mut nodes_by_id: HashMap<u64, Node> = HashMap::with_capacity(nodes_vec.len());
    for node in &nodes_vec {
        if nodes_by_id.insert(node.node_id, *node).is_some() {
            return Err(CellError::DuplicateNode(node.node_id));
        }
    }

    let roots: Vec<u64> = nodes_vec
        .iter()
        .filter(|n| n.parent_id.is_none())
        .map(|n| n.node_id)
        .collect();
    let root = match roots.as_slice() {
        [] => return Err(CellError::NoRoot),
        [root] => *root,
        _ => return Err(CellError::MultipleRoots(roots)),
    };

    ////////////////////////
    // BFS traversal for topological order
    ////////////////////////
    let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
    for n in &nodes_vec {
        if let Some(parent) = n.parent_id {
            if !nodes_by_id.contains_key(&parent) {
                return Err(CellError::MissingParent {
                    node: n.node_id,
                    parent,
                });
            }
            children.entry(parent).or_default().push(n.node_id);
        }
    }

    let mut sorted: Vec<Node> = Vec::with_capacity(nodes_vec.len());
    let mut queue: VecDeque<u64> = VecDeque::from([root]);
    let mut visited: HashSet<u64> = HashSet::new();
    let mut zero_radius_count: HashMap<StructureIdentifier, usize> = HashMap::new();

    while let Some(node_id) = queue.pop_front() {
        if !visited.insert(node_id) {
            warn!("Cycle detected at {}", node_id);
            continue;
        }
        let mut node = nodes_by_id[&node_id];
        if node.radius == 0.0 {
            *zero_radius_count
                .entry(node.structured_identifier)
                .or_insert(0) += 1;
            node.radius = 1.0;
        }
        sorted.push(node);

        if let Some(child_ids) = children.get(&node_id) {
            queue.extend(child_ids.iter().copied().filter(|c| !visited.contains(c)));
        }
    }

    if sorted.len() < nodes_vec.len() {
        warn!(
            "Dropped {} nodes unreachable from root {} (cycle)",
            nodes_vec.len() - sorted.len(),
            root
        );
        children.retain(|parent, _| visited.contains(parent));
    }

    if !zero_radius_count.is_empty() {
        info!(
            "SWC Label Convention: 0=undefined, 1=soma, 2=axon, 3=basal dendrite, 4=apical dendrite, 5=fork, 6=end"
        );
        info!("Fixed zero-radius points by type: {:?}", zero_radius_count);
    }
    info!("Processed {} nodes", sorted.len());

    let index = sorted
        .iter()
        .enumerate()
        .map(|(i, node)| (node.node_id, i))
        .collect();

    Ok(Morphology {
        nodes: sorted,
        index,
        children,
    })
}

/// Reads an SWC file from `read_path`
pub fn read_swc(read_path: impl AsRef<Path>, options: &ReaderOptions) -> Result<Morphology> {
    let path = read_path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| CellError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_swc(&text, options)
}
