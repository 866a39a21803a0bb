//! Terminal driver for the legal-assistant wizards.
//!
//! Usage:
//!   juris wizards
//!   juris run --wizard legal-chat --message "Quel délai de prescription ?"
//!   juris run --wizard contract-analysis --input-file contrat.json --message "Analyse"
//!   juris run --wizard correspondence --message "Mise en demeure" --pdf
//!   juris pdf --file conclusions.md

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use juris_stream::clarification::{Answer, Clarification, ClarificationAnswers, QuestionKind};
use juris_stream::phases::PhaseName;
use juris_stream::wizard::{
    ContractAnalysis, Correspondence, EntityFormation, LegalChat, ProceduralDocument, Wizard,
};
use juris_stream::{
    ClientConfig, PdfConfig, PdfResponse, ReqwestPdfJobApi, SessionOutcome, SessionResult,
    SessionUpdate, StreamController, WizardKind, WizardSession, generate_pdf, init_observability,
};

#[derive(Parser)]
#[command(name = "juris")]
#[command(about = "Stream legal-assistant wizards from the terminal")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List wizards and their phases
    Wizards,
    /// Run one wizard conversation
    Run {
        /// Wizard slug (contract-analysis, entity-formation, legal-chat, ...)
        #[arg(short, long)]
        wizard: WizardKind,

        /// First user message
        #[arg(short, long)]
        message: String,

        /// Wizard input fields as a JSON object
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,

        /// File holding the wizard input fields as a JSON object
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Print the final outcome as JSON
        #[arg(long)]
        json: bool,

        /// Also generate a PDF of the final answer
        #[arg(long)]
        pdf: bool,
    },
    /// Generate a PDF from a text file
    Pdf {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_observability();
    let args = Args::parse();

    match args.command {
        Command::Wizards => {
            for kind in WizardKind::ALL {
                let phases = kind.phase_names();
                if phases.is_empty() {
                    println!("{kind}");
                } else {
                    println!("{kind}: {}", phases.join(" → "));
                }
            }
            Ok(())
        }
        Command::Run {
            wizard,
            message,
            input,
            input_file,
            json,
            pdf,
        } => {
            let input = load_input(input, input_file)?;
            let config = ClientConfig::from_env()?;
            let result = match wizard {
                WizardKind::ContractAnalysis => {
                    converse::<ContractAnalysis>(config, input, &message, json).await?
                }
                WizardKind::EntityFormation => {
                    converse::<EntityFormation>(config, input, &message, json).await?
                }
                WizardKind::LegalChat => converse::<LegalChat>(config, input, &message, json).await?,
                WizardKind::Correspondence => {
                    converse::<Correspondence>(config, input, &message, json).await?
                }
                WizardKind::ProceduralDocument => {
                    converse::<ProceduralDocument>(config, input, &message, json).await?
                }
            };
            if pdf {
                render_pdf(&result.to_history_text()).await?;
            }
            Ok(())
        }
        Command::Pdf { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            render_pdf(&content).await
        }
    }
}

async fn render_pdf(content: &str) -> Result<()> {
    let config = PdfConfig::from_env()?;
    let api = ReqwestPdfJobApi::new(config.clone())?;
    let result = generate_pdf(&api, content, &config).await;
    let (status, response) = PdfResponse::from_result(&result);
    println!("{}", serde_json::to_string_pretty(&response)?);
    if status != 200 {
        bail!("pdf generation failed with status {status}");
    }
    Ok(())
}

fn load_input(inline: Option<String>, file: Option<PathBuf>) -> Result<serde_json::Value> {
    let raw = match (inline, file) {
        (Some(raw), _) => raw,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => return Ok(serde_json::Value::Null),
    };
    serde_json::from_str(&raw).context("wizard input is not valid JSON")
}

/// Runs turns until the backend stops asking for clarification.
async fn converse<W: Wizard>(
    config: ClientConfig,
    input: serde_json::Value,
    message: &str,
    json: bool,
) -> Result<SessionResult> {
    let controller = StreamController::<W>::from_config(config)?;
    let mut session = WizardSession::new(controller).with_input(input)?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let mut handle = session.submit(message)?;
    loop {
        while let Some(update) = handle.next_update().await {
            render_update(&update);
        }
        let outcome = session.complete(handle).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        match outcome {
            SessionOutcome::Clarification(clarification) => {
                let answers = ask(&clarification, &mut stdin).await?;
                handle = session.answer_clarification(&answers)?;
            }
            SessionOutcome::Result(result) => {
                if !json {
                    print_result(&result);
                }
                return Ok(result);
            }
            SessionOutcome::Error(failure) => {
                tracing::debug!(?failure, "session failed");
                bail!("{}", failure.user_message());
            }
            SessionOutcome::Cancelled => bail!("session cancelled"),
        }
    }
}

fn render_update<P: PhaseName>(update: &SessionUpdate<P>) {
    match update {
        SessionUpdate::Progress {
            message: Some(message),
            ..
        } => eprintln!("… {message}"),
        SessionUpdate::ToolActivity { tool: Some(tool) } => eprintln!("⚙ {tool}"),
        SessionUpdate::PhaseStarted { phase } => eprintln!("▶ {}", phase.as_str()),
        SessionUpdate::PhaseCompleted {
            phase, first: true, ..
        } => eprintln!("✓ {}", phase.as_str()),
        _ => {}
    }
}

fn print_result(result: &SessionResult) {
    match result {
        SessionResult::Text(text) => println!("{text}"),
        SessionResult::Structured(value) => {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            );
        }
        SessionResult::Phases(entries) => {
            for entry in entries {
                println!("## {}", entry.phase);
                println!(
                    "{}\n",
                    serde_json::to_string_pretty(&entry.result)
                        .unwrap_or_else(|_| entry.result.to_string())
                );
            }
        }
    }
}

async fn ask(
    clarification: &Clarification,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> Result<ClarificationAnswers> {
    eprintln!("\n{}", clarification.title);
    let mut answers = ClarificationAnswers::new();
    for question in &clarification.questions {
        eprintln!("\n{}{}", question.question, if question.required { " *" } else { "" });
        for option in &question.options {
            eprintln!("  [{}] {}", option.id, option.label);
        }
        if let Some(placeholder) = &question.placeholder {
            eprintln!("  ({placeholder})");
        }
        let Some(line) = stdin.next_line().await? else {
            bail!("stdin closed before all questions were answered");
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let answer = match question.kind {
            QuestionKind::MultiChoice => Answer::Choices(
                line.split(',')
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect(),
            ),
            QuestionKind::SingleChoice => Answer::Choice(line.to_string()),
            QuestionKind::Text | QuestionKind::Amount => Answer::Text(line.to_string()),
        };
        answers.set(question.id.clone(), answer);
    }
    Ok(answers)
}
