use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use taskdesk::api::{Api, Attachment};
use taskdesk::types::{
    CategoryInput, CheckoutRequest, LoginRequest, NewTask, PasswordChange, ProfileUpdate, RegisterRequest,
    TaskFilters, TaskPriority, TaskStatus, TaskUpdate,
};
use taskdesk::{
    ApiClient, ApiError, AuthFailure, ClientConfig, ConfigError, Notification, NotificationKind, Notifier,
    OperationRunner, SessionController,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{}", .0.user_message())]
    Api(#[from] ApiError),
    #[error(transparent)]
    Auth(#[from] AuthFailure),
    #[error("not logged in; run `taskdesk login` first")]
    NotLoggedIn,
    #[error("nothing to update; pass at least one field")]
    EmptyUpdate,
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "taskdesk", about = "Task service command-line client")]
struct Cli {
    #[arg(long, env = "TASKDESK_API_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "TASKDESK_CREDENTIALS_PATH")]
    credentials: Option<PathBuf>,

    /// Tag requests with id/attempt headers and log them at debug level.
    #[arg(long, default_value_t = false)]
    debug_requests: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "TASKDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    Whoami,
    Profile(ProfileCommand),
    Password(PasswordCommand),
    Todo(TodoCommand),
    Category(CategoryCommand),
    Billing(BillingCommand),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long, default_value = "")]
    name: String,
    #[arg(long, default_value = "")]
    first_name: String,
    #[arg(long, default_value = "")]
    last_name: String,
    #[arg(long, env = "TASKDESK_PASSWORD", hide_env_values = true)]
    password: String,
    /// Defaults to `--password`.
    #[arg(long)]
    password_confirm: Option<String>,
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Image file uploaded as the profile picture.
        #[arg(long)]
        picture: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct PasswordCommand {
    #[command(subcommand)]
    command: PasswordSubcommand,
}

#[derive(Subcommand, Debug)]
enum PasswordSubcommand {
    Change {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
        /// Defaults to `--new`.
        #[arg(long)]
        confirm: Option<String>,
    },
}

#[derive(Args, Debug)]
struct TodoCommand {
    #[command(subcommand)]
    command: TodoSubcommand,
}

#[derive(Subcommand, Debug)]
enum TodoSubcommand {
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        priority: Option<TaskPriority>,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        ordering: Option<String>,
        #[arg(long)]
        page: Option<u32>,
    },
    Get {
        id: i64,
    },
    Create {
        title: String,
        #[command(flatten)]
        fields: TaskFields,
    },
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: TaskFields,
    },
    Delete {
        id: i64,
    },
    Stats,
}

#[derive(Args, Debug)]
struct TaskFields {
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    priority: Option<TaskPriority>,
    #[arg(long)]
    status: Option<TaskStatus>,
    /// `YYYY-MM-DD`
    #[arg(long)]
    due: Option<String>,
    #[arg(long)]
    category: Option<i64>,
}

#[derive(Args, Debug)]
struct CategoryCommand {
    #[command(subcommand)]
    command: CategorySubcommand,
}

#[derive(Subcommand, Debug)]
enum CategorySubcommand {
    List,
    Create {
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct BillingCommand {
    #[command(subcommand)]
    command: BillingSubcommand,
}

#[derive(Subcommand, Debug)]
enum BillingSubcommand {
    Products,
    Subscriptions,
    Status,
    Checkout {
        #[arg(long)]
        product_id: i64,
        #[arg(long)]
        price_id: i64,
        #[arg(long)]
        success_url: Option<String>,
    },
    Cancel {
        subscription_id: i64,
    },
}

impl Command {
    fn needs_session(&self) -> bool {
        !matches!(self, Self::Login { .. } | Self::Register(_) | Self::Logout)
    }
}

// =============================================================================
// CONSOLE NOTIFIER
// =============================================================================

/// Notifications go to stderr so stdout stays machine-readable JSON.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Success => eprintln!("ok: {}", notification.message),
            NotificationKind::Error => eprintln!("error: {}", notification.message),
        }
    }
}

struct CliContext {
    controller: SessionController,
    api: Api,
    runner: OperationRunner,
    notifier: Arc<dyn Notifier>,
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
    let client = ApiClient::from_config(&config, Arc::clone(&notifier))?;
    let ctx = CliContext {
        controller: SessionController::new(client.clone()),
        api: Api::new(&client),
        runner: OperationRunner::new(Arc::clone(&notifier)),
        notifier,
    };

    if cli.command.needs_session() {
        let state = ctx.controller.restore_session().await;
        if !state.is_authenticated {
            return Err(CliError::NotLoggedIn);
        }
    }

    match cli.command {
        Command::Login { username, password } => run_login(&ctx, username, password).await,
        Command::Register(args) => run_register(&ctx, args).await,
        Command::Logout => {
            ctx.controller.logout().await;
            ctx.notifier.notify(Notification::success("Logged out"));
            Ok(())
        }
        Command::Whoami => print_json(&ctx.controller.session().user()),
        Command::Profile(profile) => run_profile(&ctx, profile).await,
        Command::Password(password) => run_password(&ctx, password).await,
        Command::Todo(todo) => run_todo(&ctx, todo).await,
        Command::Category(category) => run_category(&ctx, category).await,
        Command::Billing(billing) => run_billing(&ctx, billing).await,
    }
}

fn build_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }
    if let Some(path) = &cli.credentials {
        config.credentials_path.clone_from(path);
    }
    config.debug_requests |= cli.debug_requests;
    tracing::debug!(base_url = %config.base_url, credentials = %config.credentials_path.display(), "config loaded");
    Ok(config)
}

// =============================================================================
// AUTH
// =============================================================================

async fn run_login(ctx: &CliContext, username: String, password: String) -> Result<(), CliError> {
    let user = ctx.controller.login(&LoginRequest { username, password }).await?;
    ctx.notifier.notify(Notification::success(format!("Logged in as {}", user.display_name())));
    print_json(&user)
}

async fn run_register(ctx: &CliContext, args: RegisterArgs) -> Result<(), CliError> {
    let password_confirm = args.password_confirm.unwrap_or_else(|| args.password.clone());
    let request = RegisterRequest {
        username: args.username,
        email: args.email,
        name: args.name,
        first_name: args.first_name,
        last_name: args.last_name,
        password: args.password,
        password_confirm,
    };
    let user = ctx.controller.register(&request).await?;
    ctx.notifier.notify(Notification::success(format!("Welcome, {}", user.display_name())));
    print_json(&user)
}

async fn run_profile(ctx: &CliContext, profile: ProfileCommand) -> Result<(), CliError> {
    match profile.command {
        ProfileSubcommand::Update { name, first_name, last_name, email, picture } => {
            let update = ProfileUpdate { name, first_name, last_name, email, ..ProfileUpdate::default() };
            let picture = picture
                .map(|path| Attachment::from_path(&path).map_err(|source| CliError::ReadFile { path, source }))
                .transpose()?;
            if update.is_empty() && picture.is_none() {
                return Err(CliError::EmptyUpdate);
            }

            let user = ctx
                .runner
                .execute(|| ctx.api.users.update_profile(&update, picture), Some("Profile updated"))
                .await?;
            ctx.controller.update_user(&ProfileUpdate::from(user.clone()));
            print_json(&user)
        }
    }
}

async fn run_password(ctx: &CliContext, password: PasswordCommand) -> Result<(), CliError> {
    match password.command {
        PasswordSubcommand::Change { old, new, confirm } => {
            let change = PasswordChange {
                old_password: old,
                confirm_password: confirm.unwrap_or_else(|| new.clone()),
                new_password: new,
            };
            ctx.runner.execute(|| ctx.api.users.change_password(&change), Some("Password changed")).await?;
            Ok(())
        }
    }
}

// =============================================================================
// TODOS + CATEGORIES
// =============================================================================

async fn run_todo(ctx: &CliContext, todo: TodoCommand) -> Result<(), CliError> {
    let todos = &ctx.api.todos;
    match todo.command {
        TodoSubcommand::List { status, priority, category, search, ordering, page } => {
            let filters = TaskFilters { status, priority, category, search, ordering, page };
            print_json(&ctx.runner.execute(|| todos.list(&filters), None).await?)
        }
        TodoSubcommand::Get { id } => print_json(&ctx.runner.execute(|| todos.get(id), None).await?),
        TodoSubcommand::Create { title, fields } => {
            let task = NewTask {
                title,
                description: fields.description,
                priority: fields.priority,
                status: fields.status,
                due_date: fields.due,
                category_id: fields.category,
            };
            print_json(&ctx.runner.execute(|| todos.create(&task), Some("Task created")).await?)
        }
        TodoSubcommand::Update { id, title, fields } => {
            let update = TaskUpdate {
                title,
                description: fields.description,
                priority: fields.priority,
                status: fields.status,
                due_date: fields.due,
                category_id: fields.category,
            };
            if update == TaskUpdate::default() {
                return Err(CliError::EmptyUpdate);
            }
            print_json(&ctx.runner.execute(|| todos.update(id, &update), Some("Task updated")).await?)
        }
        TodoSubcommand::Delete { id } => {
            ctx.runner.execute(|| todos.delete(id), Some("Task deleted")).await?;
            Ok(())
        }
        TodoSubcommand::Stats => print_json(&ctx.runner.execute(|| todos.statistics(), None).await?),
    }
}

async fn run_category(ctx: &CliContext, category: CategoryCommand) -> Result<(), CliError> {
    let categories = &ctx.api.categories;
    match category.command {
        CategorySubcommand::List => print_json(&ctx.runner.execute(|| categories.list(), None).await?),
        CategorySubcommand::Create { name, color } => {
            let input = CategoryInput { name: Some(name), color };
            print_json(&ctx.runner.execute(|| categories.create(&input), Some("Category created")).await?)
        }
        CategorySubcommand::Update { id, name, color } => {
            let input = CategoryInput { name, color };
            if input == CategoryInput::default() {
                return Err(CliError::EmptyUpdate);
            }
            print_json(&ctx.runner.execute(|| categories.update(id, &input), Some("Category updated")).await?)
        }
        CategorySubcommand::Delete { id } => {
            ctx.runner.execute(|| categories.delete(id), Some("Category deleted")).await?;
            Ok(())
        }
    }
}

// =============================================================================
// BILLING
// =============================================================================

async fn run_billing(ctx: &CliContext, billing: BillingCommand) -> Result<(), CliError> {
    let api = &ctx.api.billing;
    match billing.command {
        BillingSubcommand::Products => print_json(&ctx.runner.execute(|| api.products(), None).await?),
        BillingSubcommand::Subscriptions => print_json(&ctx.runner.execute(|| api.subscriptions(), None).await?),
        BillingSubcommand::Status => print_json(&ctx.runner.execute(|| api.status(), None).await?),
        BillingSubcommand::Checkout { product_id, price_id, success_url } => {
            let request = CheckoutRequest { product_id, price_id, success_url };
            let session = ctx.runner.execute(|| api.checkout(&request), None).await?;
            ctx.notifier.notify(Notification::success(format!("Open {} to complete checkout", session.checkout_url)));
            print_json(&session)
        }
        BillingSubcommand::Cancel { subscription_id } => {
            let receipt = ctx.runner.execute(|| api.cancel(subscription_id), None).await?;
            ctx.notifier.notify(Notification::success(receipt.message.clone()));
            print_json(&receipt)
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
