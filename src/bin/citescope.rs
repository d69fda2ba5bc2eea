#![forbid(unsafe_code)]

use std::error::Error;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use tokio::sync::Notify;

use citescope::api::{PageRequest, StartJobRequest};
use citescope::{
    elapsed_seconds, filter_jobs, format_elapsed, ApiError, HttpJobApi, JobApi, JobClient,
    JobId, JobObserver, PipelineJob, PollingController, ResultCache, StatusFilter,
    TracingCallSink,
};

#[derive(Parser)]
#[command(name = "citescope", version, about = "Brand-citation pipeline job CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new pipeline job
    Start {
        /// Company profile to analyze
        #[arg(long)]
        profile: String,
        /// Number of persona categories to generate
        #[arg(long, default_value_t = 5)]
        categories: u32,
        /// Queries to expand per category
        #[arg(long, default_value_t = 10)]
        queries_per_category: u32,
        /// Providers to execute against (comma separated)
        #[arg(long, value_delimiter = ',', required = true)]
        providers: Vec<String>,
        /// Keep watching the job until it finishes
        #[arg(long)]
        watch: bool,
    },
    /// Watch a running job until it reaches a terminal status
    Watch {
        job_id: String,
    },
    /// Request cancellation of a running job
    Cancel {
        job_id: String,
    },
    /// List job history
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        /// all | completed | failed | running
        #[arg(long, default_value = "all")]
        filter: StatusFilter,
    },
    /// Print a job's category/query result tree
    Show {
        job_id: String,
        /// Also fetch per-provider responses for every query
        #[arg(long)]
        responses: bool,
        /// Concurrent category expansions
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let base: Arc<dyn JobApi> = Arc::new(HttpJobApi::from_env()?);
    // One-shot operations go through the retrying client; the poller owns
    // its own failure semantics and talks to the API directly.
    let client: Arc<dyn JobApi> = Arc::new(JobClient::new(
        Arc::clone(&base),
        Arc::new(TracingCallSink),
    ));

    match cli.command {
        Commands::Start {
            profile,
            categories,
            queries_per_category,
            providers,
            watch,
        } => {
            let req = StartJobRequest::new(profile, categories, queries_per_category, providers);
            let started = client.start_job(&req).await?;
            println!("started job {}", started.job_id);
            if watch {
                watch_job(base, started.job_id).await?;
            }
        }
        Commands::Watch { job_id } => {
            watch_job(base, JobId::new(job_id)).await?;
        }
        Commands::Cancel { job_id } => {
            let job_id = JobId::new(job_id);
            client.cancel_job(&job_id).await?;
            let job = client.job_status(&job_id).await?;
            println!("cancel requested; executor reports: {}", job.status);
        }
        Commands::List {
            limit,
            offset,
            filter,
        } => {
            let page = client.list_jobs(PageRequest::new(limit, offset)).await?;
            let now = Utc::now();
            let shown = filter_jobs(&page.jobs, filter);
            for job in &shown {
                println!("{}", summary_line(job, now));
            }
            println!(
                "{} of {} jobs (offset {offset}, filter {})",
                shown.len(),
                page.total,
                filter.as_str()
            );
        }
        Commands::Show {
            job_id,
            responses,
            concurrency,
        } => {
            show_tree(base, JobId::new(job_id), responses, concurrency).await?;
        }
    }

    Ok(())
}

fn summary_line(job: &PipelineJob, now: chrono::DateTime<Utc>) -> String {
    let elapsed = format_elapsed(elapsed_seconds(job, now));
    let mut line = format!(
        "{}  {:<22} {:>3}%  {}/{} queries  {}",
        job.id,
        job.status.as_str(),
        job.progress_percentage,
        job.queries_settled(),
        job.total_queries,
        elapsed,
    );
    if job.failed_queries > 0 {
        line.push_str(&format!("  ({} failed)", job.failed_queries));
    }
    line
}

struct ConsoleObserver {
    done: Notify,
}

#[async_trait::async_trait]
impl JobObserver for ConsoleObserver {
    async fn on_update(&self, job: &PipelineJob) {
        println!("{}", summary_line(job, Utc::now()));
    }

    async fn on_terminal(&self, job: &PipelineJob) {
        match job.status {
            citescope::JobStatus::Failed => {
                let message = job.error_message.as_deref().unwrap_or("unknown error");
                println!("job failed: {message}");
            }
            citescope::JobStatus::Cancelled => println!("job cancelled"),
            _ => {
                if job.failed_queries > 0 {
                    println!(
                        "job completed with {} of {} queries failed",
                        job.failed_queries, job.total_queries
                    );
                } else {
                    println!("job completed");
                }
            }
        }
        self.done.notify_one();
    }

    async fn on_poll_error(&self, error: &ApiError) {
        eprintln!("poll failed (will keep polling): {error}");
    }
}

async fn watch_job(api: Arc<dyn JobApi>, job_id: JobId) -> Result<(), Box<dyn Error>> {
    let poller = PollingController::new(api);
    let observer = Arc::new(ConsoleObserver {
        done: Notify::new(),
    });
    let handle = poller.attach(job_id, observer.clone() as Arc<dyn JobObserver>);

    let mut cancel_requested = false;
    loop {
        tokio::select! {
            _ = observer.done.notified() => break,
            result = tokio::signal::ctrl_c(), if !cancel_requested => {
                result?;
                eprintln!("cancelling; the executor's next status is authoritative");
                handle.request_cancel().await?;
                cancel_requested = true;
            }
        }
    }

    Ok(())
}

async fn show_tree(
    api: Arc<dyn JobApi>,
    job_id: JobId,
    with_responses: bool,
    concurrency: usize,
) -> Result<(), Box<dyn Error>> {
    let job = api.job_status(&job_id).await?;
    println!("{}", summary_line(&job, Utc::now()));

    let cache = Arc::new(ResultCache::new(api, job_id));

    let categories = match cache.load_categories().await {
        citescope::NodeState::Loaded(categories) => categories,
        citescope::NodeState::Failed(message) => {
            return Err(format!("could not load categories: {message}").into());
        }
        _ => Vec::new(),
    };

    // Expand all categories up front; per-category failures stay isolated in
    // their own nodes and are reported inline below.
    stream::iter(categories.iter().cloned())
        .map(|category| {
            let cache = Arc::clone(&cache);
            async move {
                cache.expand_category(&category.id).await;
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    for category in &categories {
        println!(
            "category {} [{}] ({} queries declared)",
            category.name, category.persona_type, category.query_count
        );

        match cache.category_queries(&category.id) {
            citescope::NodeState::Loaded(queries) => {
                for query in &queries {
                    println!("  [{:?}] {}", query.status, query.text);
                    if with_responses {
                        print_responses(&cache, &query.id).await;
                    }
                }
            }
            citescope::NodeState::Failed(message) => {
                println!("  (failed to load queries: {message})");
            }
            _ => {}
        }
    }

    Ok(())
}

async fn print_responses(cache: &Arc<ResultCache>, query_id: &citescope::api::QueryId) {
    match cache.expand_query(query_id).await {
        citescope::NodeState::Loaded(responses) => {
            for response in &responses {
                match &response.error_message {
                    Some(message) => {
                        println!("    {}/{}: provider error: {message}", response.provider, response.model);
                    }
                    None => {
                        let tokens = response
                            .tokens_used
                            .map(|t| format!(" ({t} tokens)"))
                            .unwrap_or_default();
                        println!(
                            "    {}/{}{}: {}",
                            response.provider,
                            response.model,
                            tokens,
                            first_line(&response.content)
                        );
                    }
                }
            }
        }
        citescope::NodeState::Failed(message) => {
            println!("    (failed to load responses: {message})");
        }
        _ => {}
    }
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or("")
}
