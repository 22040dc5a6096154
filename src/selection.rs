//! Choosing which intersecting datasets to download.
//!
//! Under [`SelectionMode::MostRecentOnly`] datasets are grouped into overlap
//! clusters (footprints, clipped to the boundary, connected through pairwise
//! positive-area intersection) and only the newest member(s) of each cluster
//! survive. Equal newest years are all kept. Datasets without a known year
//! only survive in clusters where no member has a known year.
use crate::catalog::IntersectingDataset;
use crate::geo_utils::overlaps;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    AllIntersecting,
    MostRecentOnly,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::AllIntersecting => write!(f, "All intersecting datasets"),
            SelectionMode::MostRecentOnly => write!(f, "Most recent data only"),
        }
    }
}

/// Something the selector decided that the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionNote {
    /// Several members of one cluster share the newest year; all are kept.
    Tie { year: u16, identifiers: Vec<String> },
    /// No member of the cluster has a known year; all are kept.
    Unranked { identifiers: Vec<String> },
    /// Dropped in favour of newer data covering the same area.
    Superseded {
        identifier: String,
        year: Option<u16>,
        newest: u16,
    },
}

impl fmt::Display for SelectionNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionNote::Tie { year, identifiers } => write!(
                f,
                "Tie: {} share the most recent year {year}; all were kept",
                identifiers.join(", ")
            ),
            SelectionNote::Unranked { identifiers } => write!(
                f,
                "Unranked: {} have no known year; all were kept",
                identifiers.join(", ")
            ),
            SelectionNote::Superseded {
                identifier,
                year: Some(year),
                newest,
            } => write!(f, "Skipped {identifier} ({year}): superseded by {newest} data"),
            SelectionNote::Superseded {
                identifier,
                year: None,
                newest,
            } => write!(
                f,
                "Skipped {identifier} (unknown year): superseded by {newest} data"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectionResult {
    /// In submission order: newest first, then by identifier.
    pub chosen: Vec<IntersectingDataset>,
    pub strategy: SelectionMode,
    pub requires_merge: bool,
    pub notes: Vec<SelectionNote>,
}

pub fn select(datasets: &[IntersectingDataset], mode: SelectionMode) -> SelectionResult {
    match mode {
        SelectionMode::AllIntersecting => SelectionResult {
            chosen: datasets.to_vec(),
            strategy: mode,
            requires_merge: false,
            notes: vec![],
        },
        SelectionMode::MostRecentOnly => select_most_recent(datasets),
    }
}

fn select_most_recent(datasets: &[IntersectingDataset]) -> SelectionResult {
    // Work on a canonical order so the result does not depend on input order
    let mut ordered: Vec<&IntersectingDataset> = datasets.iter().collect();
    ordered.sort_by(|a, b| a.identifier.cmp(&b.identifier));

    let mut chosen = vec![];
    let mut notes = vec![];
    for cluster in overlap_clusters(&ordered) {
        let members: Vec<&IntersectingDataset> = cluster.iter().map(|&i| ordered[i]).collect();
        let Some(newest) = members.iter().filter_map(|d| d.year()).max() else {
            if members.len() > 1 {
                notes.push(SelectionNote::Unranked {
                    identifiers: identifiers(&members),
                });
            }
            chosen.extend(members);
            continue;
        };

        let (kept, dropped): (Vec<_>, Vec<_>) =
            members.into_iter().partition(|d| d.year() == Some(newest));
        if kept.len() > 1 {
            notes.push(SelectionNote::Tie {
                year: newest,
                identifiers: identifiers(&kept),
            });
        }
        notes.extend(dropped.iter().map(|d| SelectionNote::Superseded {
            identifier: d.identifier.clone(),
            year: d.year(),
            newest,
        }));
        chosen.extend(kept);
    }

    chosen.sort_by(|a, b| {
        b.year()
            .cmp(&a.year())
            .then_with(|| a.identifier.cmp(&b.identifier))
    });
    let chosen: Vec<IntersectingDataset> = chosen.into_iter().cloned().collect();

    SelectionResult {
        requires_merge: chosen.len() > 1,
        chosen,
        strategy: SelectionMode::MostRecentOnly,
        notes,
    }
}

fn identifiers(datasets: &[&IntersectingDataset]) -> Vec<String> {
    datasets.iter().map(|d| d.identifier.clone()).collect()
}

/// Connected components of the overlap graph, as sorted index lists ordered
/// by their smallest index.
fn overlap_clusters(datasets: &[&IntersectingDataset]) -> Vec<Vec<usize>> {
    let mut sets = DisjointSets::new(datasets.len());
    for i in 0..datasets.len() {
        for j in (i + 1)..datasets.len() {
            if overlaps(&datasets[i].coverage, &datasets[j].coverage) {
                sets.union(i, j);
            }
        }
    }

    let mut clusters: Vec<Vec<usize>> = vec![];
    let mut cluster_of_root: Vec<Option<usize>> = vec![None; datasets.len()];
    for i in 0..datasets.len() {
        let root = sets.find(i);
        match cluster_of_root[root] {
            Some(c) => clusters[c].push(i),
            None => {
                cluster_of_root[root] = Some(clusters.len());
                clusters.push(vec![i]);
            }
        }
    }
    clusters
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index becomes the root so clusters are numbered stably
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}
