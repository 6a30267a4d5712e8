//! Command-line interface schema for treeop.
//!
//! Defines the clap struct for the flag-driven surface and validates flag
//! combinations before any scanning starts. Long-form command text is
//! sourced from `help_text`.

use clap::Parser;
use std::path::PathBuf;

mod help_text;

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("--intersect requires at least two directories")]
    IntersectNeedsTwoRoots,
    #[error("--remove-copies-from-last requires at least two directories")]
    RemoveFromLastNeedsTwoRoots,
    #[error("{0} requires --intersect")]
    RequiresIntersect(&'static str),
    #[error("--remove-dirdb cannot be combined with other operations")]
    RemoveDirdbCombined,
    #[error("--readbench cannot be combined with other operations")]
    ReadbenchCombined,
    #[error(
        "at most one of --remove-copies, --remove-copies-from-last, \
         --hardlink-copies, --break-hardlinks may be given"
    )]
    MultipleMutations,
}

/// Operations on huge directory trees
#[derive(Parser, Debug)]
#[command(
    name = "treeop",
    about,
    long_about = help_text::ROOT_LONG_ABOUT,
    disable_version_flag = true
)]
pub struct Cli {
    /// Compute the intersection across two or more roots
    #[arg(long)]
    pub intersect: bool,

    /// Print per-root statistics including redundancy and hardlink totals
    #[arg(long)]
    pub stats: bool,

    /// List every indexed file
    #[arg(long)]
    pub list_files: bool,

    /// List redundant files (non-canonical duplicate occurrences)
    #[arg(long)]
    pub list_redundant: bool,

    /// List hardlink groups
    #[arg(long)]
    pub list_hardlinks: bool,

    /// List files unique to the first root (requires --intersect)
    #[arg(long)]
    pub list_first: bool,

    /// List files unique to the last root (requires --intersect)
    #[arg(long)]
    pub list_last: bool,

    /// Copy files unique to the first root into DIR (requires --intersect)
    #[arg(long, value_name = "DIR")]
    pub extract_first: Option<PathBuf>,

    /// Copy files unique to the last root into DIR (requires --intersect)
    #[arg(long, value_name = "DIR")]
    pub extract_last: Option<PathBuf>,

    /// Delete duplicate content in trees other than the first (or keep
    /// only the newest copy when used without --intersect)
    #[arg(long)]
    pub remove_copies: bool,

    /// Delete duplicate content only from the last root
    #[arg(long)]
    pub remove_copies_from_last: bool,

    /// Replace duplicates on the same device with hardlinks
    #[arg(long)]
    pub hardlink_copies: bool,

    /// Rewrite hardlink group members as independent files
    #[arg(long)]
    pub break_hardlinks: bool,

    /// Match on (digest, basename) instead of digest alone
    #[arg(long)]
    pub same_filename: bool,

    /// Exclude files below this size from matching
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub min_size: u64,

    /// Plan only: print `Would ...` lines, mutate nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Remove directories left empty, bottom-up, after other operations
    #[arg(long)]
    pub remove_empty_dirs: bool,

    /// Ignore existing .dirdb files, rehash everything, overwrite
    #[arg(long, conflicts_with = "update_dirdb")]
    pub new_dirdb: bool,

    /// Refresh .dirdb files, rewriting them even when nothing changed
    #[arg(long)]
    pub update_dirdb: bool,

    /// Recursively delete all .dirdb files under the given roots
    #[arg(long)]
    pub remove_dirdb: bool,

    /// Stream-read every file and report raw read throughput
    #[arg(long)]
    pub readbench: bool,

    /// Read buffer size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = crate::hasher::DEFAULT_BUFSIZE)]
    pub bufsize: usize,

    /// Print a file size histogram with the given bucket size in bytes
    #[arg(long, value_name = "BYTES")]
    pub size_histogram: Option<u64>,

    /// Largest file size to include in the histogram
    #[arg(long, value_name = "BYTES")]
    pub histogram_max: Option<u64>,

    /// Increase verbosity (-v for info, -vv for debug).
    /// Takes precedence over RUST_LOG.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Directory trees to operate on
    #[arg(required = true, value_name = "DIR")]
    pub roots: Vec<PathBuf>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    fn mutation_count(&self) -> usize {
        [
            self.remove_copies,
            self.remove_copies_from_last,
            self.hardlink_copies,
            self.break_hardlinks,
        ]
        .iter()
        .filter(|&&flag| flag)
        .count()
    }

    /// Whether any explicit operation was requested. Without one, a plain
    /// scan with per-root aggregates is performed.
    pub fn has_operation(&self) -> bool {
        self.intersect
            || self.stats
            || self.list_files
            || self.list_redundant
            || self.list_hardlinks
            || self.list_first
            || self.list_last
            || self.extract_first.is_some()
            || self.extract_last.is_some()
            || self.mutation_count() > 0
            || self.remove_empty_dirs
            || self.size_histogram.is_some()
            || self.update_dirdb
    }

    /// Reject impossible flag combinations before any scanning starts.
    pub fn validate(&self) -> Result<(), UsageError> {
        if self.intersect && self.roots.len() < 2 {
            return Err(UsageError::IntersectNeedsTwoRoots);
        }
        if self.remove_copies_from_last && self.roots.len() < 2 {
            return Err(UsageError::RemoveFromLastNeedsTwoRoots);
        }
        if self.list_first && !self.intersect {
            return Err(UsageError::RequiresIntersect("--list-first"));
        }
        if self.list_last && !self.intersect {
            return Err(UsageError::RequiresIntersect("--list-last"));
        }
        if self.extract_first.is_some() && !self.intersect {
            return Err(UsageError::RequiresIntersect("--extract-first"));
        }
        if self.extract_last.is_some() && !self.intersect {
            return Err(UsageError::RequiresIntersect("--extract-last"));
        }
        if self.mutation_count() > 1 {
            return Err(UsageError::MultipleMutations);
        }
        if self.remove_dirdb {
            let other_ops = self.intersect
                || self.stats
                || self.list_files
                || self.list_redundant
                || self.list_hardlinks
                || self.list_first
                || self.list_last
                || self.extract_first.is_some()
                || self.extract_last.is_some()
                || self.mutation_count() > 0
                || self.size_histogram.is_some()
                || self.update_dirdb
                || self.new_dirdb
                || self.readbench;
            if other_ops {
                return Err(UsageError::RemoveDirdbCombined);
            }
        }
        if self.readbench && self.has_operation() {
            return Err(UsageError::ReadbenchCombined);
        }
        Ok(())
    }
}
