//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, CellAlignment, Table};
use serde::Serialize;

use pollstore_bench::BenchReport;
use pollstore_core::{Member, OptionId, PollOption, Tally, User, UserId, VoteOutcome};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// One admission attempt of a scripted run.
#[derive(Debug, Clone, Serialize)]
pub struct VoteLine {
    pub user: UserId,
    pub option: OptionId,
    pub outcome: VoteOutcome,
}

/// One backend's pass through the demonstration script.
#[derive(Debug, Clone)]
pub struct DemoRun {
    pub backend: &'static str,
    pub votes: Vec<VoteLine>,
    pub tally: Tally,
    pub options: Vec<PollOption>,
    /// The leading option and who voted for it.
    pub leader_voters: Option<(OptionId, Vec<User>)>,
}

/// A titled follow-graph query result.
#[derive(Debug, Clone, Serialize)]
pub struct SocialQuery {
    #[serde(rename = "query")]
    pub title: String,
    pub members: Vec<Member>,
}

/// One Redis key as listed by `inspect`.
#[cfg(feature = "redis")]
#[derive(Debug, Clone, Serialize)]
pub struct KeyRow {
    pub key: String,
    pub kind: String,
    pub value: String,
}

/// A ranked tally row with its option label.
#[derive(Debug, Serialize)]
struct RankedRow<'a> {
    place: usize,
    option: &'a str,
    label: &'a str,
    votes: u64,
}

fn ranked_rows<'a>(tally: &'a Tally, options: &'a [PollOption]) -> Vec<RankedRow<'a>> {
    tally
        .entries()
        .iter()
        .enumerate()
        .map(|(i, entry)| RankedRow {
            place: i + 1,
            option: entry.option.as_str(),
            label: options
                .iter()
                .find(|o| o.id == entry.option)
                .map(|o| o.label.as_str())
                .unwrap_or(entry.option.as_str()),
            votes: entry.votes,
        })
        .collect()
}

/// English ordinal for a ranking place: 1st, 2nd, 3rd, 4th, 11th, 21st.
pub fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the outcome of each vote in a scripted run.
    fn format_votes(&self, backend: &str, votes: &[VoteLine]) -> String;

    /// Format a tally as a ranking.
    fn format_tally(&self, backend: &str, tally: &Tally, options: &[PollOption]) -> String;

    /// Format the voters of one option.
    fn format_voters(&self, option: &OptionId, voters: &[User]) -> String;

    /// Format benchmark reports.
    fn format_bench(&self, reports: &[BenchReport]) -> String;

    /// Format every backend's demonstration run as one document.
    fn format_demo(&self, runs: &[DemoRun]) -> String;

    /// Format the follow-graph queries as one document.
    fn format_social(&self, queries: &[SocialQuery]) -> String;

    /// Format a key listing.
    #[cfg(feature = "redis")]
    fn format_keys(&self, keys: &[KeyRow]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_votes(&self, backend: &str, votes: &[VoteLine]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["User", "Option", "Outcome"]);
        for vote in votes {
            table.add_row(vec![
                vote.user.to_string(),
                vote.option.to_string(),
                vote.outcome.to_string(),
            ]);
        }
        format!("[{}] votes\n{}", backend, table)
    }

    fn format_tally(&self, backend: &str, tally: &Tally, options: &[PollOption]) -> String {
        let rows = ranked_rows(tally, options);
        let mut lines = vec![format!("[{}] results for poll {}", backend, tally.poll)];

        for row in &rows {
            lines.push(format!(
                "{} place: {} ({} votes)",
                ordinal(row.place),
                row.label,
                row.votes
            ));
        }

        let mut table = Table::new();
        table.set_header(vec!["Option", "Label", "Votes"]);
        for row in &rows {
            table.add_row(vec![
                Cell::new(row.option),
                Cell::new(row.label),
                Cell::new(row.votes).set_alignment(CellAlignment::Right),
            ]);
        }
        lines.push(table.to_string());
        lines.push(format!("{} vote(s) counted", tally.total()));

        lines.join("\n")
    }

    fn format_voters(&self, option: &OptionId, voters: &[User]) -> String {
        if voters.is_empty() {
            return format!("Nobody voted for {}", option);
        }
        let names: Vec<&str> = voters.iter().map(User::display_name).collect();
        format!("Voters for {}: {}", option, names.join(", "))
    }

    fn format_bench(&self, reports: &[BenchReport]) -> String {
        if reports.is_empty() {
            return "No results".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec![
            "Backend", "Votes", "Accepted", "Rejected", "Elapsed (ms)", "Votes/s",
        ]);
        for report in reports {
            table.add_row(vec![
                Cell::new(&report.backend),
                Cell::new(report.votes).set_alignment(CellAlignment::Right),
                Cell::new(report.accepted).set_alignment(CellAlignment::Right),
                Cell::new(report.rejected).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", report.elapsed.as_secs_f64() * 1_000.0))
                    .set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.0}", report.throughput()))
                    .set_alignment(CellAlignment::Right),
            ]);
        }
        table.to_string()
    }

    fn format_demo(&self, runs: &[DemoRun]) -> String {
        let mut sections = Vec::new();
        for run in runs {
            sections.push(self.format_votes(run.backend, &run.votes));
            sections.push(self.format_tally(run.backend, &run.tally, &run.options));
            if let Some((option, voters)) = &run.leader_voters {
                sections.push(self.format_voters(option, voters));
            }
        }
        sections.join("\n\n")
    }

    fn format_social(&self, queries: &[SocialQuery]) -> String {
        queries
            .iter()
            .map(|query| {
                if query.members.is_empty() {
                    return format!("{}\n(none)", query.title);
                }
                let mut table = Table::new();
                table.set_header(vec!["Id", "Username", "Name"]);
                for member in &query.members {
                    table.add_row(vec![
                        member.id.to_string(),
                        member.username.clone(),
                        member.full_name.clone(),
                    ]);
                }
                format!("{}\n{}", query.title, table)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[cfg(feature = "redis")]
    fn format_keys(&self, keys: &[KeyRow]) -> String {
        if keys.is_empty() {
            return "No keys".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Key", "Type", "Value"]);
        for key in keys {
            table.add_row(vec![&key.key, &key.kind, &key.value]);
        }
        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

fn tally_json(backend: &str, tally: &Tally, options: &[PollOption]) -> serde_json::Value {
    serde_json::json!({
        "backend": backend,
        "poll": tally.poll,
        "total": tally.total(),
        "results": ranked_rows(tally, options),
    })
}

impl Formatter for JsonFormatter {
    fn format_votes(&self, backend: &str, votes: &[VoteLine]) -> String {
        to_json(&serde_json::json!({ "backend": backend, "votes": votes }))
    }

    fn format_tally(&self, backend: &str, tally: &Tally, options: &[PollOption]) -> String {
        to_json(&tally_json(backend, tally, options))
    }

    fn format_voters(&self, option: &OptionId, voters: &[User]) -> String {
        to_json(&serde_json::json!({ "option": option, "voters": voters }))
    }

    fn format_bench(&self, reports: &[BenchReport]) -> String {
        to_json(reports)
    }

    fn format_demo(&self, runs: &[DemoRun]) -> String {
        let runs: Vec<serde_json::Value> = runs
            .iter()
            .map(|run| {
                let mut value = tally_json(run.backend, &run.tally, &run.options);
                value["votes"] = serde_json::json!(run.votes);
                if let Some((option, voters)) = &run.leader_voters {
                    value["leader_voters"] =
                        serde_json::json!({ "option": option, "voters": voters });
                }
                value
            })
            .collect();
        to_json(&runs)
    }

    fn format_social(&self, queries: &[SocialQuery]) -> String {
        to_json(queries)
    }

    #[cfg(feature = "redis")]
    fn format_keys(&self, keys: &[KeyRow]) -> String {
        to_json(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollstore_core::{PollId, PollSeed};
    use std::time::Duration;

    fn demo_tally() -> Tally {
        Tally::ranked(PollId(1), [("A", 3), ("B", 1), ("C", 1)])
    }

    #[test]
    fn test_ordinal() {
        let got: Vec<String> = [1, 2, 3, 4, 11, 12, 13, 21, 22, 101].iter().map(|n| ordinal(*n)).collect();
        assert_eq!(
            got,
            ["1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "101st"]
        );
    }

    #[test]
    fn test_table_tally_ranking() {
        let seed = PollSeed::demo();
        let output = TableFormatter.format_tally("sqlite", &demo_tally(), &seed.options);

        assert!(output.starts_with("[sqlite] results for poll 1"));
        assert!(output.contains("1st place: Option A (3 votes)"));
        assert!(output.contains("2nd place: Option B (1 votes)"));
        assert!(output.contains("3rd place: Option C (1 votes)"));
        assert!(output.ends_with("5 vote(s) counted"));
    }

    #[test]
    fn test_label_falls_back_to_option_id() {
        let output = TableFormatter.format_tally("sled", &demo_tally(), &[]);
        assert!(output.contains("1st place: A (3 votes)"));
    }

    #[test]
    fn test_json_tally() {
        let seed = PollSeed::demo();
        let output = JsonFormatter.format_tally("sled", &demo_tally(), &seed.options);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["poll"], 1);
        assert_eq!(value["total"], 5);
        assert_eq!(value["results"][0]["label"], "Option A");
        assert_eq!(value["results"][2]["place"], 3);
    }

    #[test]
    fn test_voters_display_names() {
        let voters = vec![User::named(101u64, "user:101"), User::anonymous("guest")];
        assert_eq!(
            TableFormatter.format_voters(&"A".into(), &voters),
            "Voters for A: user:101, guest"
        );
        assert_eq!(TableFormatter.format_voters(&"B".into(), &[]), "Nobody voted for B");
    }

    #[test]
    fn test_bench_table() {
        let reports = vec![BenchReport {
            backend: "sled".into(),
            votes: 100,
            accepted: 100,
            rejected: 0,
            elapsed: Duration::from_millis(20),
        }];
        let output = TableFormatter.format_bench(&reports);
        assert!(output.contains("sled"));
        assert!(output.contains("5000"));
        assert_eq!(TableFormatter.format_bench(&[]), "No results");
    }

    fn demo_run(backend: &'static str) -> DemoRun {
        DemoRun {
            backend,
            votes: vec![VoteLine {
                user: 101u64.into(),
                option: "A".into(),
                outcome: VoteOutcome::Accepted,
            }],
            tally: demo_tally(),
            options: PollSeed::demo().options,
            leader_voters: Some(("A".into(), vec![User::named(101u64, "user:101")])),
        }
    }

    #[test]
    fn test_json_demo_is_one_document() {
        let output = JsonFormatter.format_demo(&[demo_run("sqlite"), demo_run("sled")]);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        let runs = value.as_array().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1]["backend"], "sled");
        assert_eq!(runs[0]["results"][0]["votes"], 3);
        assert_eq!(runs[0]["votes"][0]["user"], "101");
        assert_eq!(runs[0]["leader_voters"]["option"], "A");
    }

    #[test]
    fn test_table_demo_sections() {
        let output = TableFormatter.format_demo(&[demo_run("sled")]);
        assert!(output.starts_with("[sled] votes"));
        assert!(output.contains("1st place: Option A (3 votes)"));
        assert!(output.ends_with("Voters for A: user:101"));
    }

    #[test]
    fn test_social_json_is_one_document() {
        let queries = vec![
            SocialQuery {
                title: "Suggestions for Alice Wonder".into(),
                members: vec![Member::new(4, "diana", "Diana Prince")],
            },
            SocialQuery {
                title: "Followers of Eva".into(),
                members: Vec::new(),
            },
        ];
        let output = JsonFormatter.format_social(&queries);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value[0]["query"], "Suggestions for Alice Wonder");
        assert_eq!(value[0]["members"][0]["full_name"], "Diana Prince");
        assert!(TableFormatter.format_social(&queries).contains("Followers of Eva\n(none)"));
    }
}
