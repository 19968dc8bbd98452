//! Composition target resolver.
//!
//! Builds the explicit target list for one operation: every federated graph
//! whose label matcher accepts the changed subgraph, each graph's contracts,
//! and the feature-flag variants layered on each graph. Each target carries the
//! exact subgraph set it must be composed from.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::audit::OperationKind;
use crate::composer::SubgraphInput;
use crate::labels;
use crate::types::{CompositionTarget, Contract, FeatureFlag, FederatedGraph, Subgraph, TargetKey};

/// Inputs to target resolution.
///
/// `changed` is the subgraph under change with the proposed SDL and labels
/// already applied. For a delete it is the subgraph as currently stored.
pub struct ResolveRequest<'a> {
    pub kind: OperationKind,
    pub changed: &'a Subgraph,
    pub namespace_subgraphs: &'a [Subgraph],
    pub federated_graphs: &'a [FederatedGraph],
    pub contracts: &'a [Contract],
    pub feature_flags: &'a [FeatureFlag],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: CompositionTarget,
    /// Ordered by subgraph name, names unique.
    pub subgraphs: Vec<SubgraphInput>,
}

/// Federated graphs whose matcher accepts `labels`, sorted by name.
pub fn matching_graphs<'a>(
    graphs: &'a [FederatedGraph],
    labels: &BTreeSet<crate::labels::Label>,
) -> Vec<&'a FederatedGraph> {
    let mut matched: Vec<&FederatedGraph> = graphs
        .iter()
        .filter(|g| labels::matches(&g.label_matchers, labels))
        .collect();
    matched.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    matched.dedup_by_key(|g| g.id);
    matched
}

pub fn resolve_targets(req: &ResolveRequest<'_>) -> Vec<ResolvedTarget> {
    let changed = req.changed;

    // Published base (non-feature) subgraphs after the change is applied.
    let mut base_set: Vec<Subgraph> = req
        .namespace_subgraphs
        .iter()
        .filter(|s| !s.is_feature_subgraph() && s.name != changed.name && s.sdl.is_some())
        .cloned()
        .collect();
    if !changed.is_feature_subgraph() && req.kind != OperationKind::Delete {
        base_set.push(changed.clone());
    }
    base_set.sort_by(|a, b| a.name.cmp(&b.name));

    // A feature subgraph is placed by its base subgraph's labels.
    let placement_labels = match changed.base_subgraph_id {
        Some(base_id) => match req.namespace_subgraphs.iter().find(|s| s.id == base_id) {
            Some(base) => base.labels.clone(),
            None => return Vec::new(),
        },
        None => changed.labels.clone(),
    };

    // A relabelled subgraph must also leave the graphs its stored labels
    // matched; those recompose from members that no longer include it.
    let mut graphs = matching_graphs(req.federated_graphs, &placement_labels);
    if let Some(stored) = stored_copy(req) {
        if stored.labels != placement_labels {
            graphs.extend(matching_graphs(req.federated_graphs, &stored.labels));
            graphs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            graphs.dedup_by_key(|g| g.id);
        }
    }

    let mut out = Vec::new();
    let mut seen: BTreeSet<TargetKey> = BTreeSet::new();

    for graph in graphs {
        let members: Vec<&Subgraph> = base_set
            .iter()
            .filter(|s| labels::matches(&graph.label_matchers, &s.labels))
            .collect();

        if !changed.is_feature_subgraph() {
            let inputs: Vec<SubgraphInput> = members
                .iter()
                .map(|s| SubgraphInput::from_subgraph(s, None))
                .collect();

            let target = CompositionTarget::federated_graph(graph);
            if seen.insert(target.key) {
                out.push(ResolvedTarget {
                    target,
                    subgraphs: inputs.clone(),
                });
            }

            let mut contracts: Vec<&Contract> = req
                .contracts
                .iter()
                .filter(|c| c.source_graph_id == graph.id)
                .collect();
            contracts.sort_by(|a, b| a.name.cmp(&b.name));
            for contract in contracts {
                let target = CompositionTarget::contract(graph, contract);
                if seen.insert(target.key) {
                    out.push(ResolvedTarget {
                        target,
                        subgraphs: inputs.clone(),
                    });
                }
            }
        }

        let mut flags: Vec<&FeatureFlag> = req
            .feature_flags
            .iter()
            .filter(|f| f.enabled && flag_applies_to(f, graph))
            .filter(|f| {
                !changed.is_feature_subgraph() || f.feature_subgraph_ids.contains(&changed.id)
            })
            .collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        for flag in flags {
            let Some(inputs) = variant_inputs(req, flag, &members) else {
                continue;
            };
            let target = CompositionTarget::feature_flag_variant(graph, flag);
            if seen.insert(target.key) {
                out.push(ResolvedTarget {
                    target,
                    subgraphs: inputs,
                });
            }
        }
    }
    out
}

/// The published base copy of the changed subgraph, if one is stored.
fn stored_copy<'a>(req: &'a ResolveRequest<'_>) -> Option<&'a Subgraph> {
    if req.changed.is_feature_subgraph() || req.kind == OperationKind::Delete {
        return None;
    }
    req.namespace_subgraphs
        .iter()
        .find(|s| s.name == req.changed.name && !s.is_feature_subgraph() && s.sdl.is_some())
}

fn flag_applies_to(flag: &FeatureFlag, graph: &FederatedGraph) -> bool {
    flag.labels.is_empty() || labels::matches(&graph.label_matchers, &flag.labels)
}

/// The graph's member set with each base subgraph swapped for the flag's
/// feature subgraph. `None` when the flag substitutes nothing in this graph.
fn variant_inputs(
    req: &ResolveRequest<'_>,
    flag: &FeatureFlag,
    members: &[&Subgraph],
) -> Option<Vec<SubgraphInput>> {
    let feature_subgraphs: Vec<&Subgraph> = flag
        .feature_subgraph_ids
        .iter()
        .filter_map(|id| feature_subgraph(req, *id))
        .collect();

    let mut substituted = false;
    let mut inputs: Vec<SubgraphInput> = members
        .iter()
        .map(|base| {
            match feature_subgraphs
                .iter()
                .find(|f| f.base_subgraph_id == Some(base.id))
            {
                Some(feature) => {
                    substituted = true;
                    SubgraphInput::from_subgraph(feature, None)
                }
                None => SubgraphInput::from_subgraph(base, None),
            }
        })
        .collect();
    if !substituted {
        return None;
    }
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    Some(inputs)
}

/// Look up a feature subgraph, preferring the changed copy. Unpublished feature
/// subgraphs and a deleted changed subgraph are left out.
fn feature_subgraph<'a>(req: &'a ResolveRequest<'_>, id: Uuid) -> Option<&'a Subgraph> {
    let sg = if req.changed.id == id {
        if req.kind == OperationKind::Delete {
            return None;
        }
        req.changed
    } else {
        req.namespace_subgraphs.iter().find(|s| s.id == id)?
    };
    (sg.is_feature_subgraph() && sg.sdl.is_some()).then_some(sg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{parse_labels, LabelMatcher};
    use crate::types::TargetKind;
    use proptest::prelude::*;

    fn subgraph(name: &str, labels: &[&str]) -> Subgraph {
        Subgraph {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()),
            namespace_id: Uuid::nil(),
            name: name.into(),
            routing_url: format!("http://{name}"),
            subscription_url: None,
            subscription_protocol: None,
            labels: parse_labels(labels).unwrap(),
            sdl: Some(format!("type Query {{ {name}: Int }}")),
            base_subgraph_id: None,
        }
    }

    fn graph(name: &str, matchers: &[&str]) -> FederatedGraph {
        FederatedGraph {
            id: Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()),
            namespace_id: Uuid::nil(),
            name: name.into(),
            routing_url: format!("http://{name}/graphql"),
            label_matchers: matchers
                .iter()
                .map(|m| LabelMatcher::parse(m).unwrap())
                .collect(),
        }
    }

    fn names(targets: &[ResolvedTarget]) -> Vec<String> {
        targets.iter().map(|t| t.target.name.clone()).collect()
    }

    #[test]
    fn matches_graphs_and_builds_member_sets() {
        let reviews = subgraph("reviews", &["team=a"]);
        let products = subgraph("products", &["team=a"]);
        let billing = subgraph("billing", &["team=b"]);
        let all = vec![reviews.clone(), products, billing];
        let graphs = vec![graph("prod", &["team=a"]), graph("internal", &["team=b"])];

        let targets = resolve_targets(&ResolveRequest {
            kind: OperationKind::Check,
            changed: &reviews,
            namespace_subgraphs: &all,
            federated_graphs: &graphs,
            contracts: &[],
            feature_flags: &[],
        });
        assert_eq!(names(&targets), vec!["prod"]);
        let members: Vec<&str> = targets[0].subgraphs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(members, vec!["products", "reviews"]);
    }

    #[test]
    fn unmatched_subgraph_has_no_targets() {
        let orphan = subgraph("orphan", &["team=z"]);
        let graphs = vec![graph("prod", &["team=a"])];
        let targets = resolve_targets(&ResolveRequest {
            kind: OperationKind::Publish,
            changed: &orphan,
            namespace_subgraphs: &[],
            federated_graphs: &graphs,
            contracts: &[],
            feature_flags: &[],
        });
        assert!(targets.is_empty());
    }

    #[test]
    fn changed_sdl_replaces_stored_copy() {
        let stored = subgraph("reviews", &["team=a"]);
        let mut changed = stored.clone();
        changed.sdl = Some("type Query { reviews: Int, extra: Int }".into());
        let graphs = vec![graph("prod", &["team=a"])];
        let targets = resolve_targets(&ResolveRequest {
            kind: OperationKind::Check,
            changed: &changed,
            namespace_subgraphs: std::slice::from_ref(&stored),
            federated_graphs: &graphs,
            contracts: &[],
            feature_flags: &[],
        });
        assert_eq!(targets[0].subgraphs.len(), 1);
        assert!(targets[0].subgraphs[0].sdl.contains("extra"));
    }

    #[test]
    fn relabelled_subgraph_recomposes_graphs_it_left() {
        let stored = subgraph("reviews", &["team=a"]);
        let products = subgraph("products", &["team=a"]);
        let mut moved = stored.clone();
        moved.labels = parse_labels(&["team=b"]).unwrap();
        let all = vec![stored, products];
        let prod = graph("prod", &["team=a"]);
        let internal = graph("internal", &["team=b"]);
        let contract = Contract {
            id: Uuid::new_v4(),
            name: "public".into(),
            source_graph_id: prod.id,
            exclude_tags: BTreeSet::new(),
            include_tags: BTreeSet::new(),
        };

        for kind in [OperationKind::Check, OperationKind::Publish] {
            let targets = resolve_targets(&ResolveRequest {
                kind,
                changed: &moved,
                namespace_subgraphs: &all,
                federated_graphs: &[prod.clone(), internal.clone()],
                contracts: std::slice::from_ref(&contract),
                feature_flags: &[],
            });
            assert_eq!(names(&targets), vec!["internal", "prod", "public"]);
            let members = |i: usize| -> Vec<&str> {
                targets[i].subgraphs.iter().map(|s| s.name.as_str()).collect()
            };
            assert_eq!(members(0), vec!["reviews"]);
            assert_eq!(members(1), vec!["products"]);
            assert_eq!(members(2), vec!["products"]);
        }
    }

    #[test]
    fn delete_removes_subgraph_from_set() {
        let reviews = subgraph("reviews", &["team=a"]);
        let products = subgraph("products", &["team=a"]);
        let all = vec![reviews.clone(), products];
        let graphs = vec![graph("prod", &["team=a"])];
        let targets = resolve_targets(&ResolveRequest {
            kind: OperationKind::Delete,
            changed: &reviews,
            namespace_subgraphs: &all,
            federated_graphs: &graphs,
            contracts: &[],
            feature_flags: &[],
        });
        let members: Vec<&str> = targets[0].subgraphs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(members, vec!["products"]);
    }

    #[test]
    fn contracts_and_variants_follow_their_graph() {
        let reviews = subgraph("reviews", &["team=a"]);
        let mut feature = subgraph("reviews-next", &[]);
        feature.base_subgraph_id = Some(reviews.id);
        let all = vec![reviews.clone(), feature.clone()];
        let prod = graph("prod", &["team=a"]);
        let contract = Contract {
            id: Uuid::new_v4(),
            name: "public".into(),
            source_graph_id: prod.id,
            exclude_tags: ["internal".to_string()].into(),
            include_tags: BTreeSet::new(),
        };
        let flag = FeatureFlag {
            id: Uuid::new_v4(),
            namespace_id: Uuid::nil(),
            name: "next".into(),
            enabled: true,
            labels: BTreeSet::new(),
            feature_subgraph_ids: vec![feature.id],
        };
        let disabled = FeatureFlag {
            name: "off".into(),
            id: Uuid::new_v4(),
            enabled: false,
            ..flag.clone()
        };

        let targets = resolve_targets(&ResolveRequest {
            kind: OperationKind::Publish,
            changed: &reviews,
            namespace_subgraphs: &all,
            federated_graphs: std::slice::from_ref(&prod),
            contracts: std::slice::from_ref(&contract),
            feature_flags: &[flag.clone(), disabled],
        });
        let kinds: Vec<TargetKind> = targets.iter().map(|t| t.target.key.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TargetKind::FederatedGraph,
                TargetKind::Contract,
                TargetKind::FeatureFlagVariant
            ]
        );
        assert_eq!(targets[0].subgraphs, targets[1].subgraphs);
        let variant: Vec<&str> = targets[2].subgraphs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(variant, vec!["reviews-next"]);
        assert_eq!(targets[2].target.feature_flag_id, Some(flag.id));
    }

    #[test]
    fn feature_subgraph_change_only_recomposes_its_variants() {
        let reviews = subgraph("reviews", &["team=a"]);
        let mut feature = subgraph("reviews-next", &[]);
        feature.base_subgraph_id = Some(reviews.id);
        let all = vec![reviews.clone(), feature.clone()];
        let prod = graph("prod", &["team=a"]);
        let flag = FeatureFlag {
            id: Uuid::new_v4(),
            namespace_id: Uuid::nil(),
            name: "next".into(),
            enabled: true,
            labels: BTreeSet::new(),
            feature_subgraph_ids: vec![feature.id],
        };
        let mut changed = feature.clone();
        changed.sdl = Some("type Query { next: Int }".into());

        let targets = resolve_targets(&ResolveRequest {
            kind: OperationKind::Check,
            changed: &changed,
            namespace_subgraphs: &all,
            federated_graphs: std::slice::from_ref(&prod),
            contracts: &[],
            feature_flags: std::slice::from_ref(&flag),
        });
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target.key.kind, TargetKind::FeatureFlagVariant);
        assert_eq!(targets[0].subgraphs[0].sdl, "type Query { next: Int }");
    }

    #[test]
    fn scoped_flag_skips_graphs_it_does_not_match() {
        let reviews = subgraph("reviews", &["team=a"]);
        let mut feature = subgraph("reviews-next", &[]);
        feature.base_subgraph_id = Some(reviews.id);
        let all = vec![reviews.clone(), feature.clone()];
        let graphs = vec![graph("prod", &["team=a"]), graph("stage", &["team=a"])];
        let mut graphs = graphs;
        graphs[1].label_matchers.push(LabelMatcher::parse("env=stage").unwrap());
        let flag = FeatureFlag {
            id: Uuid::new_v4(),
            namespace_id: Uuid::nil(),
            name: "next".into(),
            enabled: true,
            labels: parse_labels(&["env=stage"]).unwrap(),
            feature_subgraph_ids: vec![feature.id],
        };
        let targets = resolve_targets(&ResolveRequest {
            kind: OperationKind::Check,
            changed: &reviews,
            namespace_subgraphs: &all,
            federated_graphs: &graphs,
            contracts: &[],
            feature_flags: std::slice::from_ref(&flag),
        });
        assert_eq!(names(&targets), vec!["prod", "stage", "stage:next"]);
    }

    // ── Properties ─────────────────────────────────────────────

    const KEYS: &[&str] = &["team", "env"];
    const VALUES: &[&str] = &["a", "b"];

    fn label_strategy() -> impl Strategy<Value = String> {
        (0..KEYS.len(), 0..VALUES.len()).prop_map(|(k, v)| format!("{}={}", KEYS[k], VALUES[v]))
    }

    fn matcher_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(
            prop::collection::vec(label_strategy(), 1..3).prop_map(|g| g.join(",")),
            0..3,
        )
    }

    proptest! {
        #[test]
        fn resolution_is_order_independent_set_of_matching_graphs(
            labels in prop::collection::btree_set(label_strategy(), 0..3),
            matchers in prop::collection::vec(matcher_strategy(), 1..6),
            seed in any::<u64>(),
        ) {
            let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
            let changed = subgraph("reviews", &label_refs);
            let graphs: Vec<FederatedGraph> = matchers
                .iter()
                .enumerate()
                .map(|(i, m)| {
                    let refs: Vec<&str> = m.iter().map(String::as_str).collect();
                    graph(&format!("g{i}"), &refs)
                })
                .collect();

            let mut shuffled = graphs.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            let resolve = |gs: &[FederatedGraph]| -> BTreeSet<Uuid> {
                resolve_targets(&ResolveRequest {
                    kind: OperationKind::Check,
                    changed: &changed,
                    namespace_subgraphs: &[],
                    federated_graphs: gs,
                    contracts: &[],
                    feature_flags: &[],
                })
                .into_iter()
                .map(|t| t.target.key.target_id)
                .collect()
            };

            let expected: BTreeSet<Uuid> = graphs
                .iter()
                .filter(|g| {
                    if g.label_matchers.is_empty() {
                        changed.labels.is_empty()
                    } else {
                        g.label_matchers.iter().any(|m| m.labels.is_subset(&changed.labels))
                    }
                })
                .map(|g| g.id)
                .collect();

            prop_assert_eq!(resolve(&graphs), expected.clone());
            prop_assert_eq!(resolve(&shuffled), expected);
        }
    }
}
