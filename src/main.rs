#![deny(missing_docs)]

//! Terminal front end for an active-learning labeling session.

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use labelloop::backend::HttpBackend;
use labelloop::config::{self, AppConfig};
use labelloop::logging;
use labelloop::runtime::{RuntimeEvent, SessionRuntime};
use labelloop::session::{
    BinaryLabel, DataPoint, FilterPredicate, GroupDefinition, GroupReview, GroupedAnswer,
    LabelingMode, LearnerKind, PointId, SamplingStrategy, SessionError, SessionPhase,
    SessionView, grouped,
};

/// How long one command waits for the backend before returning to the prompt.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Candidates listed after each command.
const SHOWN_CANDIDATES: usize = 10;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    if let Err(err) = logging::init("info") {
        eprintln!("Logging disabled: {err}");
    }
    let config = options.resolve_config()?;
    let mode = options.labeling_mode()?;
    let backend = HttpBackend::new(&config.backend)
        .map_err(|err| err.to_string())?
        .with_grouped_labels(matches!(mode, LabelingMode::Grouped(_)));
    tracing::info!(backend = %backend.base_url(), "Connecting to learning backend");

    let seed: Vec<DataPoint> = options.seed.iter().map(|&id| DataPoint::bare(id)).collect();
    let controller =
        labelloop::session::SessionController::new(config.session_options(mode), seed);
    let mut runtime = SessionRuntime::new(Arc::new(backend), controller);
    if options.seed.is_empty() {
        runtime
            .set_sampling_strategy(SamplingStrategy::Random)
            .map_err(|err| err.to_string())?;
        report_events(runtime.settle(SETTLE_TIMEOUT));
    }
    print_view(&runtime.view());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| format!("Failed to read stdin: {err}"))?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = execute(&mut runtime, command) {
            println!("error: {err}");
        }
        report_events(runtime.settle(SETTLE_TIMEOUT));
        print_view(&runtime.view());
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct Options {
    backend: Option<String>,
    config_path: Option<PathBuf>,
    seed: Vec<u64>,
    groups: Option<Vec<BTreeSet<usize>>>,
    feature_count: Option<usize>,
    factorized: bool,
}

impl Options {
    fn resolve_config(&self) -> Result<AppConfig, String> {
        let mut config = match &self.config_path {
            Some(path) => config::load_from(path),
            None => config::load_or_default(),
        }
        .map_err(|err| err.to_string())?;
        if let Some(url) = &self.backend {
            config.backend.base_url = url.clone();
        }
        if self.factorized {
            config.session.learner = LearnerKind::Factorized;
        }
        Ok(config)
    }

    fn labeling_mode(&self) -> Result<LabelingMode, String> {
        let Some(groups) = &self.groups else {
            return Ok(LabelingMode::Scalar);
        };
        let feature_count = self.feature_count.unwrap_or_else(|| {
            groups
                .iter()
                .flat_map(|group| group.iter())
                .max()
                .map_or(0, |max| max + 1)
        });
        GroupDefinition::new(groups.clone(), feature_count)
            .map(LabelingMode::Grouped)
            .map_err(|err| err.to_string())
    }
}

fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    let mut options = Options::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--backend" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--backend requires a value".to_string())?;
                options.backend = Some(value.to_string());
            }
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                options.config_path = Some(PathBuf::from(value));
            }
            "--seed" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--seed requires a value".to_string())?;
                options.seed = parse_id_list(value)?;
            }
            "--groups" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--groups requires a value".to_string())?;
                options.groups = Some(parse_groups(value)?);
            }
            "--features" => {
                idx += 1;
                let value =
                    args.get(idx).ok_or_else(|| "--features requires a value".to_string())?;
                let count = value
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid feature count: {value}"))?;
                options.feature_count = Some(count);
            }
            "--factorized" => {
                options.factorized = true;
            }
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }
    if options.feature_count.is_some() && options.groups.is_none() {
        return Err("--features only applies together with --groups".to_string());
    }
    Ok(Some(options))
}

fn parse_id_list(value: &str) -> Result<Vec<u64>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>().map_err(|_| format!("Invalid point id: {part}")))
        .collect()
}

/// `0,1;2` is two groups: features 0 and 1, then feature 2.
fn parse_groups(value: &str) -> Result<Vec<BTreeSet<usize>>, String> {
    value
        .split(';')
        .map(|group| {
            group
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<usize>()
                        .map_err(|_| format!("Invalid feature index: {part}"))
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Label { index: usize, label: i64 },
    /// Grouped label; listed groups reject the point, none accepts it.
    Grouped { index: usize, rejected: Vec<usize> },
    Random,
    Filter(FilterPredicate),
    Point(u64),
    Previous,
    Next,
    History,
    Retry,
    Export(PathBuf),
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();
    let command = match (verb, rest.as_slice()) {
        ("y", [index]) => Command::Label {
            index: parse_index(index)?,
            label: 1,
        },
        ("n", [index]) => Command::Label {
            index: parse_index(index)?,
            label: 0,
        },
        ("g", [index, groups @ ..]) => Command::Grouped {
            index: parse_index(index)?,
            rejected: groups
                .iter()
                .map(|group| parse_index(group))
                .collect::<Result<_, _>>()?,
        },
        ("random", []) => Command::Random,
        ("filter", [column, "=", values]) => Command::Filter(FilterPredicate::values(
            *column,
            values
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        ("filter", [column, min, max]) => {
            Command::Filter(FilterPredicate::range(*column, parse_bound(min)?, parse_bound(max)?))
        }
        ("point", [row]) => Command::Point(
            row.parse::<u64>()
                .map_err(|_| format!("Invalid row id: {row}"))?,
        ),
        ("prev", []) => Command::Previous,
        ("next", []) => Command::Next,
        ("history", []) => Command::History,
        ("retry", []) => Command::Retry,
        ("export", [path]) => Command::Export(PathBuf::from(path)),
        ("quit" | "q", []) => Command::Quit,
        ("help" | "?", []) => return Err(command_help()),
        _ => return Err(format!("Unrecognized command: {}\n{}", line.trim(), command_help())),
    };
    Ok(Some(command))
}

fn parse_index(value: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .map_err(|_| format!("Invalid index: {value}"))
}

/// `-` leaves a range side open.
fn parse_bound(value: &str) -> Result<Option<f64>, String> {
    if value == "-" {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("Invalid bound: {value}"))
}

fn execute<G>(runtime: &mut SessionRuntime<G>, command: Command) -> Result<(), String>
where
    G: labelloop::session::BackendGateway + ?Sized + 'static,
{
    match command {
        Command::Label { index, label } => runtime
            .label_point(index, label)
            .map_err(|err| err.to_string()),
        Command::Grouped { index, rejected } => {
            let answer = grouped_answer(runtime.view(), runtime.controller().mode(), index, &rejected)
                .map_err(|err| err.to_string())?;
            runtime
                .label_grouped_point(index, answer)
                .map_err(|err| err.to_string())
        }
        Command::Random => runtime
            .set_sampling_strategy(SamplingStrategy::Random)
            .map_err(|err| err.to_string()),
        Command::Filter(predicate) => runtime
            .request_filtered_points(vec![predicate])
            .map_err(|err| err.to_string()),
        Command::Point(row) => runtime
            .request_specific_point(PointId(row))
            .map_err(|err| err.to_string()),
        Command::Previous => {
            println!("iteration {}", runtime.previous_iteration());
            Ok(())
        }
        Command::Next => {
            println!("iteration {}", runtime.next_iteration());
            Ok(())
        }
        Command::History => {
            print_history(runtime);
            Ok(())
        }
        Command::Retry => runtime.retry_submission().map_err(|err| err.to_string()),
        Command::Export(path) => {
            let dataset = runtime
                .export_labeled_dataset()
                .map_err(|err| err.to_string())?;
            std::fs::write(&path, dataset)
                .map_err(|err| format!("Failed to write {}: {err}", path.display()))?;
            println!("exported labeled dataset to {}", path.display());
            Ok(())
        }
        Command::Quit => Ok(()),
    }
}

fn grouped_answer(
    view: SessionView,
    mode: &LabelingMode,
    index: usize,
    rejected: &[usize],
) -> Result<GroupedAnswer, SessionError> {
    if rejected.is_empty() {
        return Ok(GroupedAnswer::Accept);
    }
    let Some(groups) = mode.group_definition() else {
        return Err(SessionError::ModeMismatch { expected: "grouped" });
    };
    let points = view.state.points_to_label();
    let point = points.get(index).ok_or(SessionError::OutOfRange {
        index,
        len: points.len(),
    })?;
    let mut review = GroupReview::for_point(point.id);
    for &group in rejected {
        review.toggle(group);
    }
    Ok(GroupedAnswer::Reject {
        per_group_negative: grouped::encode(&review, groups)?,
    })
}

fn report_events(events: Vec<RuntimeEvent>) {
    for event in events {
        match event {
            RuntimeEvent::SubmissionAcknowledged { submission, offered } => {
                println!("submission {} acknowledged, {offered} candidate(s)", submission.0);
            }
            RuntimeEvent::SubmissionFailed(err) => println!("{err}; type `retry` to resend"),
            RuntimeEvent::FilterResults { offered } => {
                println!("filter matched {offered} unlabeled point(s)");
            }
            RuntimeEvent::SnapshotsRecorded(iterations) => {
                for iteration in iterations {
                    println!("recorded iteration {iteration}");
                }
            }
            RuntimeEvent::SnapshotDropped { ticket, reason } => {
                println!("predictions for submission {} unavailable: {reason}", ticket.0);
            }
            RuntimeEvent::PointReceived(id) => println!("point {id} added"),
            RuntimeEvent::Rejected(err) => println!("ignored reply: {err}"),
            RuntimeEvent::RequestFailed(reason) => println!("request failed: {reason}"),
        }
    }
}

fn print_view(view: &SessionView) {
    let state = &view.state;
    let phase = match state.phase() {
        SessionPhase::InitialSampling => format!("initial sampling ({:?})", view.strategy),
        SessionPhase::Exploration => "exploration".to_string(),
    };
    println!(
        "[{phase}] positive={} negative={} pending={} labeled batches={} iterations={}",
        state.has_positive(),
        state.has_negative(),
        state.pending_batch().len(),
        state.all_labeled_points().len(),
        view.history_len
    );
    if view.awaiting_retry {
        println!("last submission failed; `retry` to resend");
    }
    for (index, point) in state
        .points_to_label()
        .iter()
        .take(SHOWN_CANDIDATES)
        .enumerate()
    {
        println!("  {index}: point {} {:?}", point.id, point.features);
    }
    let hidden = state.points_to_label().len().saturating_sub(SHOWN_CANDIDATES);
    if hidden > 0 {
        println!("  ... {hidden} more");
    }
    let _ = io::stdout().flush();
}

fn print_history<G>(runtime: &SessionRuntime<G>)
where
    G: labelloop::session::BackendGateway + ?Sized + 'static,
{
    let history = runtime.controller().history();
    if history.is_empty() {
        println!("no iterations yet");
        return;
    }
    for snapshot in history.entries() {
        let marker = if snapshot.iteration_index == history.current_iteration() {
            ">"
        } else {
            " "
        };
        let positive = snapshot
            .grid_predictions
            .iter()
            .filter(|prediction| prediction.label == BinaryLabel::Positive)
            .count();
        let labeled: Vec<String> = snapshot
            .labeled_batch
            .iter()
            .map(|point| format!("{}={}", point.id(), point.label.overall().as_int()))
            .collect();
        let total = runtime
            .controller()
            .labeled_through(snapshot.iteration_index)
            .len();
        println!(
            "{marker} {}: labeled [{}] ({total} so far), {positive}/{} grid points positive",
            snapshot.iteration_index,
            labeled.join(", "),
            snapshot.grid_predictions.len()
        );
    }
}

fn command_help() -> String {
    [
        "Commands:",
        "  y <i> | n <i>              Label candidate i positive or negative.",
        "  g <i> [group..]            Grouped label; listed groups reject the point.",
        "  random                     Use random sampling for the initial phase.",
        "  filter <col> <min> <max>   Filter sampling by range (`-` for an open side).",
        "  filter <col> = v1,v2       Filter sampling by categorical values.",
        "  point <row>                Fetch a specific row to label.",
        "  prev | next | history      Browse recorded iterations.",
        "  retry                      Resend a failed submission.",
        "  export <path>              Save the backend's labeled dataset.",
        "  quit",
    ]
    .join("\n")
}

fn help_text() -> String {
    [
        "labelloop",
        "",
        "Interactive labeling session against an active-learning backend.",
        "",
        "Usage:",
        "  labelloop [--backend <url>] [--seed <id,id,..>] [--groups <0,1;2>]",
        "",
        "Options:",
        "  --backend <url>     Backend base URL (overrides config.toml).",
        "  --config <path>     Config file (defaults to the app config location).",
        "  --seed <ids>        Comma-separated row ids offered first.",
        "  --groups <list>     Grouped labeling; groups separated by `;`.",
        "  --features <n>      Feature count for --groups; missing features become groups.",
        "  --factorized        Use the factorized learner.",
        "",
        command_help().as_str(),
    ]
    .join("\n")
}
