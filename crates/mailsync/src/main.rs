//! `mailsync` - command-line front end for the mailsync engine.
//!
//! Signs a user in, syncs folders and thread pages into the local store,
//! and searches merged contacts.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use mailsync_core::{
    Filter, FolderNode, FolderRole, KeyringCredentialStore, MailContext, Mailbox, SyncConfig,
    ThreadSync, UserId,
};
use mailsync_oauth::Token;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "mailsync", version, about = "Local-first mail cache and sync engine")]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, env = "MAILSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Authenticated user id.
    #[arg(long, env = "MAILSYNC_USER", global = true, default_value_t = 0)]
    user: i64,

    /// Mailbox email address (defaults to the first mailbox).
    #[arg(long, global = true)]
    mailbox: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a token for the user.
    Login {
        /// Access token.
        #[arg(long)]
        access_token: String,
        /// Refresh token.
        #[arg(long)]
        refresh_token: String,
    },
    /// List the user's mailboxes.
    Mailboxes,
    /// Sync and print the folder tree.
    Folders,
    /// Sync one page of a folder's threads.
    Threads {
        /// Folder id or role name (inbox, sent, drafts, spam, trash, archive).
        #[arg(default_value = "inbox")]
        folder: String,
        /// Page number, starting at 1.
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Server-side filter.
        #[arg(long, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,
    },
    /// Fetch and print a message body.
    Read {
        /// Message uid.
        uid: String,
    },
    /// Refresh contacts and search them.
    Contacts {
        /// Case-insensitive search on name or email.
        #[arg(default_value = "")]
        query: String,
    },
    /// Remove the stored token and close the local store.
    SignOut,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Seen,
    Unseen,
    Starred,
    Attachments,
}

impl From<FilterArg> for Filter {
    fn from(value: FilterArg) -> Self {
        match value {
            FilterArg::All => Self::All,
            FilterArg::Seen => Self::Seen,
            FilterArg::Unseen => Self::Unseen,
            FilterArg::Starred => Self::Starred,
            FilterArg::Attachments => Self::Attachments,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailsync=info,mailsync_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::load_default()?,
    };
    let context = MailContext::from_config(config, Arc::new(KeyringCredentialStore))?;
    let user = UserId::new(cli.user);
    info!("Starting mailsync for user {}", user);

    match cli.command {
        Command::Login {
            access_token,
            refresh_token,
        } => {
            let token = Token::new(access_token, "Bearer").with_refresh_token(refresh_token);
            context.authenticator().reauthenticate(user, &token)?;
            println!("Stored credential for user {user}");
        }
        Command::Mailboxes => {
            for mailbox in context.mailboxes(user).await? {
                println!("{}\t{}\t{} unseen", mailbox.uuid, mailbox.email, mailbox.unseen_messages);
            }
        }
        Command::Folders => {
            let mailbox = select_mailbox(&context, user, cli.mailbox.as_deref()).await?;
            let session = context.mailbox_session(&mailbox).await?;
            for node in session.sync.sync_folders(&mailbox).await? {
                print_tree(&node);
            }
        }
        Command::Threads {
            folder,
            page,
            filter,
        } => {
            let mailbox = select_mailbox(&context, user, cli.mailbox.as_deref()).await?;
            let session = context.mailbox_session(&mailbox).await?;
            let store = session.sync.store();
            if store.folders().await?.is_empty() {
                session.sync.sync_folders(&mailbox).await?;
            }
            let folder = match FolderRole::parse(&folder) {
                Some(role) => store.folder_by_role(role).await?,
                None => store.folder(&folder).await?,
            }
            .with_context(|| format!("unknown folder {folder}"))?;

            session.sync.set_active(&mailbox, &folder.id);
            match session
                .sync
                .sync_threads(&mailbox, &folder.id, page, filter.into())
                .await?
            {
                ThreadSync::Applied { has_more, count } => {
                    println!("{count} threads in {} (more: {has_more})", folder.display_name());
                }
                ThreadSync::Stale => println!("Folder changed while loading"),
            }
            for thread in store.threads(&folder.id).await? {
                let marker = if thread.unseen_messages > 0 { '*' } else { ' ' };
                println!(
                    "{marker} {}  {}  {}",
                    thread.date.format("%Y-%m-%d %H:%M"),
                    thread.formatted_participants(),
                    thread.subject.as_deref().unwrap_or("(no subject)")
                );
            }
        }
        Command::Read { uid } => {
            let mailbox = select_mailbox(&context, user, cli.mailbox.as_deref()).await?;
            let session = context.mailbox_session(&mailbox).await?;
            let message = session.sync.fetch_message(&mailbox, &uid).await?;
            println!("Subject: {}", message.formatted_subject());
            if let Some(body) = message.body {
                println!("\n{}", body.value);
            }
        }
        Command::Contacts { query } => {
            let mailbox = select_mailbox(&context, user, cli.mailbox.as_deref()).await?;
            let session = context.mailbox_session(&mailbox).await?;
            if let Err(e) = session.contacts.refresh(&mailbox).await {
                eprintln!("Contact refresh failed, showing stored contacts: {e}");
            }
            for contact in session.contacts.contacts_matching(&query) {
                println!("{}", contact.display());
            }
        }
        Command::SignOut => {
            context.sign_out(user).await?;
            println!("Signed out user {user}");
        }
    }
    Ok(())
}

async fn select_mailbox(
    context: &MailContext,
    user: UserId,
    email: Option<&str>,
) -> Result<Mailbox> {
    let mailboxes = context.mailboxes(user).await?;
    match email {
        Some(email) => mailboxes
            .into_iter()
            .find(|m| m.email.eq_ignore_ascii_case(email))
            .ok_or_else(|| anyhow!("no mailbox {email} for user {user}")),
        None => mailboxes
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("user {user} has no mailbox")),
    }
}

fn print_tree(node: &FolderNode) {
    for (depth, folder) in node.flatten() {
        let unread = folder.unread_count.filter(|c| *c > 0).map(|c| format!(" ({c})"));
        println!(
            "{}{}{}",
            "  ".repeat(depth),
            folder.display_name(),
            unread.unwrap_or_default()
        );
    }
}
