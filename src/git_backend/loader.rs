use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use git2::{Commit, Oid, Repository, Revwalk, Sort};
use tracing::debug;

use crate::core::{CommitDetails, CommitGraph, NodeIdx};

/// Streams commit records out of a git repository and into a [`CommitGraph`].
///
/// Commits are discovered newest-first, so a child is always seen before its
/// parents; parents named by a record are interned with a provisional score
/// and corrected by `add_parent` once their real position is known.
pub struct HistoryLoader {
    path: PathBuf,
    repo: Repository,
}

impl HistoryLoader {
    pub fn new(repo_path: Option<&Path>) -> Result<Self> {
        let repo = match repo_path {
            Some(path) => Repository::open(path),
            None => Repository::open_from_env(),
        }
        .context("failed to open repository")?;
        let path = repo.path().to_path_buf();

        Ok(Self { path, repo })
    }

    /// Walk the history and build the graph on the calling thread.
    pub fn load(&self, limit: Option<usize>) -> Result<CommitGraph> {
        let graph = CommitGraph::new();
        let head = self.head_oid()?;
        let max_score = AtomicU32::new(0);

        let mut count = 0;
        for oid in self.revwalk()? {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let idx = insert_commit(&graph, &commit, &max_score)?;

            // flood "relative to checkout" backward from HEAD; edges linked
            // later re-propagate it on their own
            if head == Some(oid) {
                graph.make_relative(idx);
            }

            count += 1;
            if let Some(limit) = limit {
                if count >= limit {
                    break;
                }
            }
        }

        debug!(
            commits = graph.len(),
            max_score = max_score.load(Ordering::SeqCst),
            "loaded commit graph"
        );
        Ok(graph)
    }

    /// Walk the history once, then fan the records out over `workers`
    /// threads that feed the graph concurrently. Each worker opens its own
    /// repository handle; the shared graph takes care of ordering.
    pub fn load_concurrent(&self, workers: usize, limit: Option<usize>) -> Result<CommitGraph> {
        let oids = self.walk_oids(limit)?;
        let graph = CommitGraph::new();
        let max_score = AtomicU32::new(0);
        let workers = workers.max(1);
        let chunk_size = oids.len() / workers + 1;

        thread::scope(|scope| {
            let mut handles = Vec::new();
            for chunk in oids.chunks(chunk_size) {
                let graph = &graph;
                let max_score = &max_score;
                let path = self.path.as_path();
                handles.push(scope.spawn(move || -> Result<()> {
                    let repo = Repository::open(path)
                        .context("failed to reopen repository for graph worker")?;
                    for &oid in chunk {
                        let commit = repo.find_commit(oid)?;
                        insert_commit(graph, &commit, max_score)?;
                    }
                    Ok(())
                }));
            }
            for handle in handles {
                handle.join().map_err(|_| anyhow!("graph worker panicked"))??;
            }
            Ok::<_, anyhow::Error>(())
        })?;

        if let Some(head) = self.head_oid()? {
            if let Some(idx) = graph.lookup(&head) {
                graph.make_relative(idx);
            }
        }

        debug!(
            commits = graph.len(),
            workers, "loaded commit graph concurrently"
        );
        Ok(graph)
    }

    /// Get the checked-out HEAD commit
    pub fn head_oid(&self) -> Result<Option<Oid>> {
        match self.repo.head() {
            Ok(head) => Ok(head.target()),
            Err(_) => Ok(None),
        }
    }

    fn revwalk(&self) -> Result<Revwalk<'_>> {
        let mut revwalk = self.repo.revwalk()?;

        // Start from HEAD and all branches
        revwalk.push_head()?;
        for branch in self.repo.branches(None)? {
            let (branch, _) = branch?;
            if let Some(target) = branch.get().target() {
                revwalk.push(target)?;
            }
        }

        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        Ok(revwalk)
    }

    fn walk_oids(&self, limit: Option<usize>) -> Result<Vec<Oid>> {
        let mut oids = Vec::new();
        for oid in self.revwalk()? {
            oids.push(oid?);
            if let Some(limit) = limit {
                if oids.len() >= limit {
                    break;
                }
            }
        }
        Ok(oids)
    }
}

/// Intern a commit record, attach its metadata and link its parent edges.
/// `max_score` is the running maximum layer over the whole build; it seeds
/// provisional scores for nodes that have not been walked yet.
fn insert_commit(graph: &CommitGraph, commit: &Commit<'_>, max_score: &AtomicU32) -> Result<NodeIdx> {
    let idx = graph.intern(commit.id(), max_score.load(Ordering::SeqCst) + 1);
    graph[idx].attach_details(CommitDetails::from_commit(commit)?);

    for parent_id in commit.parent_ids() {
        let parent = graph.intern(parent_id, max_score.load(Ordering::SeqCst) + 1);
        let new_max = graph.add_parent(idx, parent, max_score.load(Ordering::SeqCst) + 1);
        max_score.fetch_max(new_max, Ordering::SeqCst);
    }

    Ok(idx)
}

impl CommitDetails {
    /// Convert a git2 commit record to the metadata attached on a node.
    pub fn from_commit(commit: &Commit<'_>) -> Result<Self> {
        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .context("invalid commit timestamp")?;

        Ok(Self {
            author: commit.author().name().unwrap_or("Unknown").to_string(),
            email: commit.author().email().unwrap_or("").to_string(),
            summary: commit.summary().unwrap_or("").to_string(),
            timestamp,
        })
    }
}
