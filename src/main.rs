mod cli;
mod digest_cache;
mod engine;
mod hasher;
mod index;
mod plan;
mod report;
mod scanner;

use cli::Cli;
use engine::MatchOptions;
use index::FileRecord;
use plan::Plan;
use scanner::{CacheMode, ScanOptions};
use std::collections::HashSet;
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Event, Level, Subscriber, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("{e}");
        return ExitCode::from(2);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    for root in &cli.roots {
        if !root.is_dir() {
            anyhow::bail!("Path '{}' is not a directory", root.display());
        }
    }

    if cli.remove_dirdb {
        let mut removed = 0u64;
        for root in &cli.roots {
            removed += scanner::remove_caches(root)?;
        }
        report::counter("removed-files", removed);
        run_remove_empty_dirs(cli, &cli.roots, &HashSet::new());
        return Ok(());
    }

    if cli.readbench {
        let stats = scanner::read_bench(&cli.roots, cli.bufsize)?;
        info!("Read {} files, {} bytes", stats.files, stats.bytes);
        let rate = if stats.elapsed > 0.0 {
            (stats.bytes as f64 / stats.elapsed) as u64
        } else {
            stats.bytes
        };
        report::counter("bufsize", cli.bufsize);
        report::counter("read-rate", rate);
        report::counter("elapsed", report::seconds(stats.elapsed));
        return Ok(());
    }

    let scan_options = ScanOptions {
        mode: if cli.new_dirdb {
            CacheMode::Rebuild
        } else if cli.update_dirdb {
            CacheMode::Update
        } else {
            CacheMode::Reuse
        },
        bufsize: cli.bufsize,
        write_cache: !cli.dry_run,
    };
    let mut indexes = Vec::with_capacity(cli.roots.len());
    for root in &cli.roots {
        indexes.push(scanner::scan_tree(root, scan_options)?);
    }

    let match_options = MatchOptions {
        same_filename: cli.same_filename,
        min_size: cli.min_size,
    };

    if cli.intersect {
        let stats = engine::intersect_stats(&indexes, match_options);
        for root_stats in &stats.roots {
            report::root_header(&root_stats.root);
            report::counter("unique-files", root_stats.unique_files);
            report::counter("shared-files", root_stats.shared_files);
            report::counter("total-files", root_stats.total_files);
        }
        report::counter("unique-total", stats.unique_total);
        report::counter("shared-total", stats.shared_total);
        report::counter("total", stats.total);
    }

    if cli.list_files {
        let records: Vec<&FileRecord> = indexes.iter().flat_map(|i| i.records()).collect();
        report::print_listing(&records);
    }

    if cli.list_redundant {
        let mut files = 0u64;
        let mut bytes = 0u64;
        for index in &indexes {
            let records = index.redundant_records();
            report::print_listing(&records);
            let (f, b) = index.redundant_totals();
            files += f;
            bytes += b;
        }
        report::counter("redundant-files", files);
        report::counter("redundant-size", bytes);
    }

    if cli.list_hardlinks {
        let mut files = 0u64;
        let mut bytes = 0u64;
        for index in &indexes {
            report::print_hardlink_groups(&index.hardlink_groups());
            let (f, b) = index.hardlinked_totals();
            files += f;
            bytes += b;
        }
        report::counter("hardlinked-files", files);
        report::counter("hardlinked-size", bytes);
    }

    if cli.list_first || cli.extract_first.is_some() {
        let selected = engine::unique_to(&indexes, 0, match_options);
        if cli.list_first {
            report::print_listing(&selected);
        }
        if let Some(dst) = &cli.extract_first {
            let stats = run_plan(cli, engine::extract_plan(&selected, dst));
            info!("Copied {} files to {}", stats.copied_files, dst.display());
        }
        report::counter("only-in-first", selected.len());
    }

    if cli.list_last || cli.extract_last.is_some() {
        let selected = engine::unique_to(&indexes, indexes.len() - 1, match_options);
        if cli.list_last {
            report::print_listing(&selected);
        }
        if let Some(dst) = &cli.extract_last {
            let stats = run_plan(cli, engine::extract_plan(&selected, dst));
            info!("Copied {} files to {}", stats.copied_files, dst.display());
        }
        report::counter("only-in-last", selected.len());
    }

    let mutation_plan = if cli.remove_copies {
        Some(if cli.intersect {
            engine::remove_copies_intersect_plan(&indexes, match_options)
        } else {
            engine::remove_copies_newest_plan(&indexes, match_options)
        })
    } else if cli.remove_copies_from_last {
        Some(engine::remove_copies_from_last_plan(&indexes, match_options))
    } else if cli.hardlink_copies {
        Some(engine::hardlink_copies_plan(&indexes, match_options))
    } else if cli.break_hardlinks {
        Some(engine::break_hardlinks_plan(&indexes))
    } else {
        None
    };

    let mut pending_removed: HashSet<PathBuf> = HashSet::new();
    if let Some(plan) = mutation_plan {
        for action in &plan.actions {
            if let plan::Action::Remove { path, .. } = action {
                pending_removed.insert(path.clone());
            }
        }
        let stats = run_plan(cli, plan);
        if stats.skipped > 0 {
            warn!("{} actions skipped", stats.skipped);
        }
        if cli.remove_copies || cli.remove_copies_from_last {
            info!("Freed {} bytes", stats.removed_size);
            report::counter("removed-files", stats.removed_files);
        }
        if cli.hardlink_copies {
            report::counter("hardlinks-created", stats.hardlinks_created);
        }
        if cli.break_hardlinks {
            report::counter("break-hardlinks", stats.broken_hardlinks);
        }
    }

    let roots: Vec<PathBuf> = indexes.iter().map(|i| i.root().to_path_buf()).collect();
    run_remove_empty_dirs(cli, &roots, &pending_removed);

    if let Some(batch) = cli.size_histogram {
        if batch == 0 {
            anyhow::bail!("size-histogram batch size must be greater than 0");
        }
        report::print_histogram(&engine::size_histogram(&indexes, batch, cli.histogram_max));
    }

    if cli.stats || !cli.has_operation() {
        for index in &indexes {
            report::root_header(index.root());
            report::counter("files", index.file_count());
            report::counter("dirs", index.dir_count());
            report::counter("total-size", index.total_size());
            if cli.stats {
                let (redundant_files, redundant_size) = index.redundant_totals();
                let (hardlinked_files, hardlinked_size) = index.hardlinked_totals();
                report::counter("redundant-files", redundant_files);
                report::counter("redundant-size", redundant_size);
                report::counter("hardlinked-files", hardlinked_files);
                report::counter("hardlinked-size", hardlinked_size);
            }
            report::counter("elapsed", report::seconds(index.elapsed()));
        }
        if indexes.len() > 1 {
            report::counter(
                "total-files",
                indexes.iter().map(|i| i.file_count()).sum::<u64>(),
            );
            report::counter(
                "total-dirs",
                indexes.iter().map(|i| i.dir_count()).sum::<u64>(),
            );
            report::counter(
                "total-size",
                indexes.iter().map(|i| i.total_size()).sum::<u64>(),
            );
        }
    }

    Ok(())
}

/// Print or execute one plan, honoring `--dry-run`. Dry-run counters come
/// from the plan itself so they match a clean execution.
fn run_plan(cli: &Cli, plan: Plan) -> plan::ExecStats {
    if plan.is_empty() {
        return plan::ExecStats::default();
    }
    if cli.dry_run {
        plan.print();
        plan.planned_stats()
    } else {
        plan.execute()
    }
}

fn run_remove_empty_dirs(cli: &Cli, roots: &[PathBuf], pending_removed: &HashSet<PathBuf>) {
    if !cli.remove_empty_dirs {
        return;
    }
    let plan = engine::empty_dirs_plan(roots, pending_removed);
    let stats = run_plan(cli, plan);
    report::counter("removed-dirs", stats.removed_dirs);
}

fn init_tracing(verbose: u8) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = PrefixFormatter { stderr_is_terminal };

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct PrefixFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for PrefixFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
