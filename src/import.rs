//! Turns a reconstructed SWC tree into cable sections.
//!
//! Unbranched runs of same-region points become one section; a new section
//! starts at the root, at every child of a branch point and wherever the
//! region changes. All soma points collapse into `soma[0]`.

use itertools::Itertools;
use log::{info, warn};
use std::collections::{HashMap, HashSet};

use crate::cell::Cell;
use crate::error::{CellError, Result};
use crate::sections::{Pt3d, Region, Section, SectionId};
use crate::swc_reader::{Morphology, Node, StructureIdentifier};

struct Builder {
    region: Region,
    points: Vec<Pt3d>,
    parent: Option<(usize, f64)>,
}

fn pt3d(node: &Node) -> Pt3d {
    Pt3d {
        x: node.x_pos,
        y: node.y_pos,
        z: node.z_pos,
        diam: 2.0 * node.radius,
    }
}

/// A lone soma point becomes a cylinder along y with length and diameter 2r
fn single_point_soma(center: Pt3d) -> Vec<Pt3d> {
    let r = center.diam / 2.0;
    vec![
        Pt3d {
            y: center.y - r,
            ..center
        },
        center,
        Pt3d {
            y: center.y + r,
            ..center
        },
    ]
}

/// Orders the points of a soma whose nodes all hang directly off one center
/// node, such as the three-point convention (center plus two points at
/// `y - r` and `y + r`). BFS order would zig-zag through the center; instead
/// the points are sorted along the axis joining the two farthest of them.
fn order_star_soma(points: &mut [Pt3d]) {
    let Some((a, b)) = points
        .iter()
        .tuple_combinations()
        .max_by(|(p, q), (r, s)| p.distance_to(q).total_cmp(&r.distance_to(s)))
        .map(|(p, q)| (*p, *q))
    else {
        return;
    };
    let axis = [b.x - a.x, b.y - a.y, b.z - a.z];
    let project = |p: &Pt3d| (p.x - a.x) * axis[0] + (p.y - a.y) * axis[1] + (p.z - a.z) * axis[2];
    points.sort_by(|p, q| project(p).total_cmp(&project(q)));
}

/// Appends the sections of `morphology` to `cell`, returning their ids in
/// creation order. With `use_axon == false` axon points and everything
/// hanging from them are skipped.
pub fn load_swc(morphology: &Morphology, cell: &mut Cell, use_axon: bool) -> Result<Vec<SectionId>> {
    if !morphology
        .nodes()
        .iter()
        .any(|n| n.structured_identifier == StructureIdentifier::Soma)
    {
        return Err(CellError::NoSoma);
    }

    let mut builders: Vec<Builder> = Vec::new();
    let mut soma_builder: Option<usize> = None;
    let mut section_of: HashMap<u64, usize> = HashMap::new();
    let mut skipped: HashSet<u64> = HashSet::new();
    let mut soma_nodes: Vec<&Node> = Vec::new();

    // Children that survive the axon filter; skipped axon branches do not
    // make their parent a branch point
    let kept_children = |node_id: u64| {
        morphology
            .children(node_id)
            .iter()
            .filter_map(|&child| morphology.node(child))
            .filter(|child| use_axon || Region::from(child.structured_identifier) != Region::Axon)
            .count()
    };

    for node in morphology.nodes() {
        let region = Region::from(node.structured_identifier);
        let parent = morphology.parent(node);

        if parent.is_some_and(|p| skipped.contains(&p.node_id))
            || (region == Region::Axon && !use_axon)
        {
            skipped.insert(node.node_id);
            continue;
        }

        if region == Region::Soma {
            let b = *soma_builder.get_or_insert_with(|| {
                builders.push(Builder {
                    region,
                    points: Vec::new(),
                    parent: None,
                });
                builders.len() - 1
            });
            if parent.is_some_and(|p| Region::from(p.structured_identifier) != Region::Soma) {
                warn!(
                    "Soma point {} hangs off a non-soma point; ignoring that connection",
                    node.node_id
                );
            }
            builders[b].points.push(pt3d(node));
            soma_nodes.push(node);
            section_of.insert(node.node_id, b);
            continue;
        }

        let Some(parent) = parent else {
            builders.push(Builder {
                region,
                points: vec![pt3d(node)],
                parent: None,
            });
            section_of.insert(node.node_id, builders.len() - 1);
            continue;
        };

        let parent_region = Region::from(parent.structured_identifier);
        let parent_section = section_of[&parent.node_id];

        if parent_region == region && kept_children(parent.node_id) == 1 {
            builders[parent_section].points.push(pt3d(node));
            section_of.insert(node.node_id, parent_section);
            continue;
        }

        let (points, parent_x) = if parent_region == Region::Soma {
            (vec![pt3d(node)], 0.5)
        } else {
            (vec![pt3d(parent), pt3d(node)], 1.0)
        };
        builders.push(Builder {
            region,
            points,
            parent: Some((parent_section, parent_x)),
        });
        section_of.insert(node.node_id, builders.len() - 1);
    }

    if !skipped.is_empty() {
        info!("Skipped {} axon points", skipped.len());
    }

    if let Some((center, rest)) = soma_nodes.split_first() {
        let star = rest.len() >= 2 && rest.iter().all(|n| n.parent_id == Some(center.node_id));
        if let (true, Some(b)) = (star, soma_builder) {
            order_star_soma(&mut builders[b].points);
        }
    }

    let mut ids = Vec::with_capacity(builders.len());
    for builder in &builders {
        let points = if builder.region == Region::Soma && builder.points.len() == 1 {
            single_point_soma(builder.points[0])
        } else {
            builder.points.clone()
        };
        ids.push(cell.push_section(Section::from_points(builder.region, 0, points)));
    }
    for (builder, &id) in builders.iter().zip(&ids) {
        if let Some((parent, x)) = builder.parent {
            cell.connect(id, ids[parent], x)?;
        }
    }

    let counts = builders.iter().map(|b| b.region).counts();
    info!(
        "Imported {} sections: {}",
        ids.len(),
        counts
            .iter()
            .sorted()
            .map(|(region, n)| format!("{region}={n}"))
            .join(", ")
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swc_reader::{ReaderOptions, parse_swc, read_swc};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn imported(use_axon: bool) -> Cell {
        let morphology = read_swc("data/cell.swc", &ReaderOptions::default()).unwrap();
        let mut cell = Cell::new("imported");
        load_swc(&morphology, &mut cell, use_axon).unwrap();
        cell
    }

    #[test]
    fn test_sections_follow_branches() {
        let cell = imported(false);
        let names: Vec<&str> = cell.sections().iter().map(Section::name).collect();
        assert_eq!(
            names,
            vec!["soma[0]", "dend[0]", "dend[1]", "apic[0]", "dend[2]", "dend[3]"]
        );
        assert!(cell.axon().is_empty());
    }

    #[test]
    fn test_single_point_soma_is_cylinder() {
        let cell = imported(false);
        let soma = cell.section("soma[0]").unwrap();
        assert_eq!(soma.pt3d().len(), 3);
        assert!(approx(soma.length(), 12.0));
        assert!(approx(soma.diam(), 12.0));
    }

    #[test]
    fn test_geometry_and_connections() {
        let cell = imported(false);
        let soma = cell.id_of("soma[0]").unwrap();
        let dend0 = cell.id_of("dend[0]").unwrap();

        let trunk = cell.get(dend0).unwrap();
        assert!(approx(trunk.length(), 60.0));
        assert!(approx(trunk.diam(), 1.9));
        assert_eq!(trunk.parent().unwrap().parent, soma);
        assert_eq!(trunk.parent().unwrap().parent_x, 0.5);

        // branches start at the fork point shared with their parent
        let branch = cell.section("dend[2]").unwrap();
        assert_eq!(branch.pt3d().len(), 2);
        assert!(approx(branch.length(), 50.0));
        assert_eq!(branch.parent().unwrap().parent, dend0);
        assert_eq!(branch.parent().unwrap().parent_x, 1.0);

        let apic = cell.section("apic[0]").unwrap();
        assert!(approx(apic.length(), 200.0));
    }

    #[test]
    fn test_use_axon_keeps_reconstructed_axon() {
        let cell = imported(true);
        let axon = cell.section("axon[0]").unwrap();
        assert_eq!(axon.pt3d().len(), 3);
        assert!(approx(axon.length(), 84.0));
        assert_eq!(cell.len(), 7);
    }

    #[test]
    fn test_axon_subtree_is_skipped() {
        let text = "1 1 0 0 0 5 -1\n2 2 0 -5 0 1 1\n3 3 0 -20 0 1 2\n4 3 5 0 0 1 1\n";
        let morphology = parse_swc(text, &ReaderOptions::default()).unwrap();
        let mut cell = Cell::new("c");
        let ids = load_swc(&morphology, &mut cell, false).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(cell.dend().len(), 1);
    }

    #[test]
    fn test_region_change_starts_section() {
        let text = "1 1 0 0 0 5 -1\n2 3 0 5 0 1 1\n3 3 0 15 0 1 2\n4 4 0 25 0 1 3\n";
        let morphology = parse_swc(text, &ReaderOptions::default()).unwrap();
        let mut cell = Cell::new("c");
        load_swc(&morphology, &mut cell, false).unwrap();
        let apic = cell.section("apic[0]").unwrap();
        assert!(approx(apic.length(), 10.0));
        assert_eq!(
            apic.parent().unwrap().parent,
            cell.id_of("dend[0]").unwrap()
        );
    }

    #[test]
    fn test_three_point_soma_is_a_2r_cylinder() {
        let text = "1 1 0 0 0 5 -1\n2 1 0 -5 0 5 1\n3 1 0 5 0 5 1\n4 3 5 0 0 1 1\n5 3 25 0 0 1 4\n";
        let morphology = parse_swc(text, &ReaderOptions::default()).unwrap();
        let mut cell = Cell::new("c");
        load_swc(&morphology, &mut cell, false).unwrap();

        let soma = cell.section("soma[0]").unwrap();
        let ys: Vec<f64> = soma.pt3d().iter().map(|p| p.y).collect();
        assert_eq!(ys, vec![-5.0, 0.0, 5.0]);
        assert!(approx(soma.length(), 10.0));
        assert!(approx(soma.diam(), 10.0));
        assert!(approx(soma.area(), std::f64::consts::PI * 10.0 * 10.0));

        let dend = cell.section("dend[0]").unwrap();
        assert!(approx(dend.length(), 20.0));
    }

    #[test]
    fn test_chained_soma_keeps_its_order() {
        // a traced soma contour: each point hangs off the previous one
        let text = "1 1 0 0 0 4 -1\n2 1 0 4 0 5 1\n3 1 0 8 0 4 2\n";
        let morphology = parse_swc(text, &ReaderOptions::default()).unwrap();
        let mut cell = Cell::new("c");
        load_swc(&morphology, &mut cell, false).unwrap();
        let soma = cell.section("soma[0]").unwrap();
        let ys: Vec<f64> = soma.pt3d().iter().map(|p| p.y).collect();
        assert_eq!(ys, vec![0.0, 4.0, 8.0]);
        assert!(approx(soma.length(), 8.0));
    }

    #[test]
    fn test_dropped_axon_branch_does_not_split_dendrite() {
        // node 2 forks into a dendrite (3) and an axon (4)
        let text = "1 1 0 0 0 5 -1\n2 3 5 0 0 1 1\n3 3 15 0 0 1 2\n4 2 5 -10 0 1 2\n5 3 25 0 0 1 3\n";
        let morphology = parse_swc(text, &ReaderOptions::default()).unwrap();

        let mut cell = Cell::new("without axon");
        load_swc(&morphology, &mut cell, false).unwrap();
        assert_eq!(cell.dend().len(), 1);
        assert!(approx(cell.section("dend[0]").unwrap().length(), 20.0));

        let mut cell = Cell::new("with axon");
        load_swc(&morphology, &mut cell, true).unwrap();
        assert_eq!(cell.dend().len(), 2);
        assert_eq!(cell.axon().len(), 1);
    }

    #[test]
    fn test_missing_soma_is_an_error() {
        let morphology =
            parse_swc("1 3 0 0 0 1 -1\n2 3 0 5 0 1 1\n", &ReaderOptions::default()).unwrap();
        let mut cell = Cell::new("c");
        assert!(matches!(
            load_swc(&morphology, &mut cell, false),
            Err(CellError::NoSoma)
        ));
    }
}
