use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lessonpath::identity::{SessionProvider, StaticSession};
use lessonpath::tracker::ToggleOutcome;
use lessonpath::{
    Config, CourseProgression, IssueOutcome, IssueReport, JsonStore, LessonAccess,
    ProgressionError, Viewer,
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the certificate listener after the last lesson
const ISSUE_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "lessonpath")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store file (defaults to the configured data directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a course catalog (courses, lessons, quizzes, questions)
    Import {
        /// Path to the catalog JSON file
        file: PathBuf,
    },
    /// Enroll a learner in a course
    Enroll {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
        /// Name printed on certificates
        #[arg(long)]
        name: Option<String>,
    },
    /// Show the course outline with lock state and progress
    Outline {
        #[arg(long)]
        course: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Flip a lesson's completion state
    Toggle {
        #[arg(long)]
        lesson: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// The lesson is currently complete
        #[arg(long)]
        completed: bool,
    },
    /// Watch a lesson video up to a position
    Watch {
        #[arg(long)]
        lesson: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Playhead position reached, in seconds
        #[arg(long)]
        seconds: f64,
        /// Video length in seconds
        #[arg(long)]
        duration: f64,
    },
    /// Take a module quiz
    Quiz {
        #[arg(long)]
        course: String,
        #[arg(long)]
        module: u32,
        #[arg(long)]
        user: String,
        #[arg(long)]
        email: Option<String>,
        /// Chosen option for each question, in order
        #[arg(long = "answer")]
        answers: Vec<String>,
    },
    /// Show an issued certificate
    Certificate {
        #[arg(long)]
        course: String,
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lessonpath=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if cli.store.is_some() {
        config.store_file = cli.store;
    }
    let store = Arc::new(JsonStore::open(config.store_path()?)?);
    let engine = CourseProgression::from_store(Arc::clone(&store), &config);

    match cli.command {
        Commands::Import { file } => {
            let catalog = JsonStore::read_catalog(&file)?;
            let counts = (catalog.lessons.len(), catalog.quizzes.len(), catalog.questions.len());
            store.import(catalog).context("Failed to save catalog")?;
            println!(
                "Imported {} lessons, {} quizzes, {} questions into {}",
                counts.0,
                counts.1,
                counts.2,
                store.path().display()
            );
        }
        Commands::Enroll { user, course, name } => {
            if store.enroll(&user, &course)? {
                println!("Enrolled {} in {}", user, course);
            } else {
                println!("{} is already enrolled in {}", user, course);
            }
            if let Some(name) = name {
                store.set_display_name(&user, &name)?;
            }
        }
        Commands::Outline { course, user, email } => {
            let viewer = viewer(user, email);
            let view = engine.load_course(&viewer, &course).await.map_err(present)?;

            println!("{} ({}% complete)", view.title, view.progress.percentage());
            for module in &view.modules {
                let lock = if module.unlocked { "" } else { " [locked]" };
                println!("\nModule {}{}", module.module_number, lock);
                for lesson in &module.lessons {
                    let mark = if lesson.completed { "x" } else { " " };
                    println!(
                        "  [{}] {}.{} {}{}",
                        mark,
                        lesson.lesson.module_number,
                        lesson.lesson.lesson_number,
                        lesson.lesson.title,
                        access_label(lesson.access)
                    );
                }
                if let Some(quiz) = &module.quiz {
                    match &module.last_attempt {
                        Some(attempt) => println!(
                            "  Quiz: last score {}% ({}), pass mark {}%",
                            attempt.score,
                            if attempt.passed { "passed" } else { "failed" },
                            quiz.passing_score
                        ),
                        None => println!("  Quiz: not attempted, pass mark {}%", quiz.passing_score),
                    }
                }
            }
            if let Some(next) = &view.next_lesson {
                println!("\nNext lesson: {}", next);
            }
            if let Some(cert) = &view.certificate {
                println!("\nCertificate {} issued to {}", cert.certificate_number, cert.user_name);
            }
        }
        Commands::Toggle { lesson, user, email, completed } => {
            let viewer = viewer(user, email);
            let mut reports = engine.certificate_reports();
            let outcome =
                engine.toggle_lesson(&viewer, &lesson, completed).await.map_err(present)?;
            println!(
                "Lesson {} is now {} ({}% of course)",
                outcome.lesson_id,
                if outcome.completed { "complete" } else { "not complete" },
                outcome.progress.percentage()
            );
            await_certificate(&outcome, &mut reports).await;
            engine.shutdown().await;
        }
        Commands::Watch { lesson, user, email, seconds, duration } => {
            let viewer = viewer(user, email);
            let mut reports = engine.certificate_reports();

            let mut player = engine.open_video(&viewer, &lesson).await.map_err(present)?;
            if player.start_position() > 0.0 {
                println!("Resuming at {:.0}s", player.start_position());
            }
            player.play().await.map_err(present)?;
            let completed = player.time_update(seconds, duration).await.map_err(present)?;
            player.pause().await.map_err(present)?;
            player.close().await;

            match completed {
                Some(outcome) => {
                    println!("Lesson {} complete ({}% of course)", lesson, outcome.progress.percentage());
                    await_certificate(&outcome, &mut reports).await;
                }
                None => println!("Saved position {:.0}s of {:.0}s", seconds, duration),
            }
            engine.shutdown().await;
        }
        Commands::Quiz { course, module, user, email, answers } => {
            let viewer = viewer(Some(user), email);
            let overview = engine.quiz_overview(&viewer, &course, module).await.map_err(present)?;
            if answers.len() != overview.question_count {
                bail!(
                    "This quiz has {} questions, got {} answers",
                    overview.question_count,
                    answers.len()
                );
            }
            if let Some(last) = &overview.last_attempt {
                println!("Retaking (last score {}%)", last.score);
            }

            let mut session = engine.start_quiz(&viewer, &course, module).await.map_err(present)?;
            for (i, answer) in answers.iter().enumerate() {
                session.answer_current(answer)?;
                if i + 1 < answers.len() {
                    session.next()?;
                }
            }
            let result = engine.submit_quiz(&mut session).await.map_err(present)?;

            for q in &result.grade.questions {
                let mark = if q.is_correct { "correct" } else { "wrong" };
                println!("{} [{}] you chose {:?}, answer {:?}", q.text, mark, q.chosen, q.correct_answer);
                if !q.explanation.is_empty() {
                    println!("    {}", q.explanation);
                }
            }
            println!(
                "Score {}% ({}/{}), {}",
                result.grade.score,
                result.grade.correct_count,
                result.grade.total_questions,
                if result.grade.passed { "passed" } else { "not passed" }
            );
            if result.exceeded_time_limit {
                println!("Submitted after the time limit");
            }
        }
        Commands::Certificate { course, user } => {
            let viewer = viewer(Some(user), None);
            match engine.certificate(&viewer, &course).await.map_err(present)? {
                Some(cert) => println!(
                    "{}\n  {} completed {} on {}",
                    cert.certificate_number,
                    cert.user_name,
                    cert.course_title,
                    cert.completion_date.format("%Y-%m-%d")
                ),
                None => println!("No certificate for {} yet", course),
            }
        }
    }

    Ok(())
}

/// The session the CLI acts as
fn viewer(user: Option<String>, email: Option<String>) -> Viewer {
    let viewer = match user {
        Some(user) => Viewer::signed_in(user, email.unwrap_or_default()),
        None => Viewer::Anonymous,
    };
    StaticSession(viewer).current()
}

/// Print the certificate once the listener has handled the completion
async fn await_certificate(outcome: &ToggleOutcome, reports: &mut mpsc::Receiver<IssueReport>) {
    if !outcome.completed || !outcome.progress.is_complete() {
        return;
    }
    match tokio::time::timeout(ISSUE_WAIT, reports.recv()).await {
        Ok(Some(IssueReport { result: Ok(IssueOutcome::Issued(cert)), .. })) => {
            println!("Certificate {} issued to {}", cert.certificate_number, cert.user_name);
        }
        Ok(Some(IssueReport { result: Err(e), .. })) => {
            eprintln!("Could not issue certificate: {}", e.user_message());
        }
        Ok(_) => {}
        Err(_) => tracing::warn!("Timed out waiting for certificate issuance"),
    }
}

fn present(e: ProgressionError) -> anyhow::Error {
    tracing::debug!("{:?}", e);
    anyhow::anyhow!(e.user_message())
}

fn access_label(access: LessonAccess) -> &'static str {
    match access {
        LessonAccess::Open => "",
        LessonAccess::FreePreview => " (free preview)",
        LessonAccess::ModuleLocked { .. } => " (locked)",
        LessonAccess::RequiresEnrollment => " (enroll to watch)",
        LessonAccess::RequiresSignIn => " (sign in to watch)",
    }
}
