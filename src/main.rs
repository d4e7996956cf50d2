use clap::{Parser, Subcommand};
use loanflow::application::service::{Collaborators, LoanService};
use loanflow::application::workflow::StepInput;
use loanflow::config::EngineConfig;
use loanflow::domain::amortization::{
    LoanTerms, biweekly_projection, early_payoff_options, refinance_comparison,
};
use loanflow::domain::ids::BorrowerId;
use loanflow::domain::loan::{LoanRecord, LoanStatus};
use loanflow::domain::policy::{CollateralItem, LoanType, assess_collateral};
use loanflow::domain::ports::{LoanStore, RepositoryRef};
use loanflow::infrastructure::clock::SystemClock;
use loanflow::infrastructure::collaborators::{
    InMemoryLedger, RecordingNotifier, StaticCreditEvaluator,
};
use loanflow::infrastructure::in_memory::InMemoryRepository;
#[cfg(feature = "storage-rocksdb")]
use loanflow::infrastructure::rocksdb::RocksDBRepository;
use loanflow::interfaces::csv::collateral_reader::CollateralReader;
use loanflow::interfaces::csv::schedule_writer::ScheduleWriter;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration JSON file (optional). Missing keys use defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the amortization schedule as CSV.
    Schedule {
        #[arg(long)]
        principal: Decimal,
        /// Annual rate in percent.
        #[arg(long)]
        rate: Decimal,
        #[arg(long)]
        term: u32,
        #[arg(long, default_value = "0")]
        fee: Decimal,
    },
    /// Early payoff scenarios and the bi-weekly projection, as JSON.
    Payoff {
        #[arg(long)]
        principal: Decimal,
        #[arg(long)]
        rate: Decimal,
        #[arg(long)]
        term: u32,
    },
    /// Compare refinancing a balance at a new rate and term, as JSON.
    Refinance {
        #[arg(long)]
        balance: Decimal,
        #[arg(long)]
        rate: Decimal,
        #[arg(long)]
        remaining: u32,
        #[arg(long)]
        new_rate: Decimal,
        #[arg(long)]
        new_term: u32,
    },
    /// Assess a collateral CSV (kind, quantity, base_value) against an amount.
    Collateral {
        #[arg(long = "type")]
        loan_type: LoanType,
        #[arg(long)]
        amount: Decimal,
        input: PathBuf,
    },
    /// Run an application through every step and submit it.
    Originate {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Borrower id; a fresh one is generated when omitted.
        #[arg(long)]
        borrower: Option<Uuid>,
        #[arg(long = "type", default_value = "CREDIT")]
        loan_type: LoanType,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        term: u32,
        /// Credit score reported for the borrower.
        #[arg(long, default_value_t = 750)]
        score: u32,
        #[arg(long, default_value = "personal")]
        purpose: String,
        /// Collateral CSV for secured loan types.
        #[arg(long)]
        collateral: Option<PathBuf>,
    },
    /// List stored loans as CSV.
    Loans {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        borrower: Option<Uuid>,
    },
}

#[derive(Serialize)]
struct LoanRow {
    loan_id: String,
    borrower: String,
    loan_type: LoanType,
    status: LoanStatus,
    principal: Decimal,
    balance: Decimal,
    payments_made: u32,
}

impl From<&LoanRecord> for LoanRow {
    fn from(loan: &LoanRecord) -> Self {
        Self {
            loan_id: loan.id().to_string(),
            borrower: loan.borrower().to_string(),
            loan_type: loan.loan_type(),
            status: loan.status(),
            principal: loan.terms().principal,
            balance: loan.current_balance().rounded().value(),
            payments_made: loan.payments_made(),
        }
    }
}

fn open_repository(db_path: Option<PathBuf>) -> Result<RepositoryRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let repo = RocksDBRepository::open(path).into_diagnostic()?;
            Ok(Arc::new(repo))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryRepository::new()))
        }
        None => Ok(Arc::new(InMemoryRepository::new())),
    }
}

fn read_collateral(path: &Path) -> Result<Vec<CollateralItem>> {
    let file = File::open(path).into_diagnostic()?;
    CollateralReader::new(file).read_all().into_diagnostic()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), value).into_diagnostic()?;
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Schedule {
            principal,
            rate,
            term,
            fee,
        } => {
            let terms = LoanTerms::compute(principal, rate, term, fee).into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = ScheduleWriter::new(stdout.lock());
            writer.write_schedule(terms.schedule()).into_diagnostic()?;
        }
        Command::Payoff {
            principal,
            rate,
            term,
        } => {
            let terms = LoanTerms::compute(principal, rate, term, Decimal::ZERO).into_diagnostic()?;
            let early_payoff =
                early_payoff_options(principal, rate, term, &config.refinance.payoff_horizons)
                    .into_diagnostic()?;
            print_json(&serde_json::json!({
                "monthly_payment": terms.monthly_payment_cents(),
                "total_interest": terms.total_interest,
                "early_payoff": early_payoff,
                "biweekly": biweekly_projection(&terms),
            }))?;
        }
        Command::Refinance {
            balance,
            rate,
            remaining,
            new_rate,
            new_term,
        } => {
            let comparison = refinance_comparison(
                balance,
                rate,
                remaining,
                new_rate,
                new_term,
                config.refinance.closing_cost_percentage,
            )
            .into_diagnostic()?;
            print_json(&comparison)?;
        }
        Command::Collateral {
            loan_type,
            amount,
            input,
        } => {
            let items = read_collateral(&input)?;
            let assessment = assess_collateral(
                loan_type,
                amount,
                &items,
                &config.application.collateral_discount_rates,
            )
            .into_diagnostic()?;
            print_json(&assessment)?;
        }
        Command::Originate {
            db_path,
            borrower,
            loan_type,
            amount,
            term,
            score,
            purpose,
            collateral,
        } => {
            let borrower = borrower.map(BorrowerId::from).unwrap_or_default();
            let credit = Arc::new(StaticCreditEvaluator::new());
            credit.set_profile(borrower, score, true).await;
            let items = match collateral {
                Some(path) => read_collateral(&path)?,
                None => Vec::new(),
            };

            let service = LoanService::new(
                config,
                Collaborators {
                    repo: open_repository(db_path)?,
                    credit,
                    ledger: Arc::new(InMemoryLedger::new()),
                    notifier: Arc::new(RecordingNotifier::new()),
                    clock: Arc::new(SystemClock),
                },
            )
            .into_diagnostic()?;

            let handle = service.start_application(borrower, loan_type).await;
            let steps = [
                StepInput::Eligibility,
                StepInput::AmountTerm {
                    amount,
                    term_months: term,
                },
                StepInput::TypeSelection { loan_type },
                StepInput::Collateral { items },
                StepInput::Confirmation { purpose },
            ];
            for step in steps {
                service.advance_step(handle, step).await.into_diagnostic()?;
            }
            let submitted = service.submit_application(handle).await.into_diagnostic()?;
            print_json(&submitted)?;
        }
        Command::Loans { db_path, borrower } => {
            let repo = open_repository(db_path)?;
            let loans = match borrower {
                Some(id) => repo.loans_by_borrower(id.into()).await.into_diagnostic()?,
                None => {
                    let mut all = Vec::new();
                    for status in LoanStatus::ALL {
                        all.extend(repo.loans_by_status(status).await.into_diagnostic()?);
                    }
                    all
                }
            };

            let stdout = io::stdout();
            let mut writer = csv::Writer::from_writer(stdout.lock());
            for loan in &loans {
                writer.serialize(LoanRow::from(loan)).into_diagnostic()?;
            }
            writer.flush().into_diagnostic()?;
        }
    }

    Ok(())
}
