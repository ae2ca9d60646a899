//! CLI surface: each subcommand maps to a route, passes the route guard,
//! then runs one flow.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::flows::account::{AccountType, SignInForm, SignUpForm};
use crate::flows::listing::{ListingForm, LISTING_CREATED};
use crate::flows::post::PostComposer;
use crate::flows::settings::{AboutSettings, GeneralSettings};
use crate::guard::GuardDecision;
use crate::media;
use crate::state::AppState;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "SOUK_PASSWORD")]
        password: String,
        /// seller or buyer
        #[arg(long)]
        account_type: AccountType,
    },
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SOUK_PASSWORD")]
        password: String,
    },
    /// Sign out and forget the saved session
    Logout,
    /// Show the signed-in user and profile
    Whoami,
    /// Show the post feed
    Feed,
    /// Publish a post
    Post {
        /// Post text
        #[arg(long)]
        content: Option<String>,
        /// Image to attach
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Create or view listings
    #[command(subcommand)]
    Listing(ListingCommand),
    /// Show a public profile
    Profile { username: String },
    /// List listing categories
    Categories,
    /// Update profile settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Manage the profile avatar
    #[command(subcommand)]
    Avatar(AvatarCommand),
}

#[derive(Subcommand, Debug)]
pub enum ListingCommand {
    Create(CreateListingArgs),
    Show { id: Uuid },
}

#[derive(Args, Debug)]
pub struct CreateListingArgs {
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub description: String,
    /// Price, e.g. 45.00
    #[arg(long)]
    pub price: String,
    /// Category id (see `souk categories`)
    #[arg(long)]
    pub category: i64,
    #[arg(long)]
    pub condition: String,
    /// Image files, in display order
    #[arg(long = "image", required = true)]
    pub images: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    General {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        /// ISO country code, empty to clear
        #[arg(long)]
        country: Option<String>,
    },
    About {
        /// Attribute code, e.g. `--set hair_color=red`; empty value clears
        #[arg(long = "set", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
        /// Accepted payment method codes (replaces the list)
        #[arg(long = "payment")]
        payments: Option<Vec<String>>,
        /// Offered item codes (replaces the list)
        #[arg(long = "offer")]
        offers: Option<Vec<String>>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AvatarCommand {
    Set { path: PathBuf },
    Remove,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

impl Command {
    /// The page this command stands for, as the route guard sees it.
    pub fn route(&self) -> &'static str {
        match self {
            Command::Signup { .. } | Command::Login { .. } => "/",
            Command::Feed | Command::Post { .. } | Command::Whoami => "/dashboard",
            Command::Listing(ListingCommand::Create(_)) => "/create-listing",
            Command::Listing(ListingCommand::Show { .. }) => "/listings",
            Command::Profile { .. } => "/profile",
            Command::Categories => "/categories",
            Command::Settings(_) | Command::Avatar(_) => "/settings",
            Command::Logout => "/logout",
        }
    }
}

/// Bring the saved session back, if it is still good.
pub async fn restore(state: &AppState) -> anyhow::Result<()> {
    let file = state.session_file();
    let Some(saved) = file.load() else {
        return Ok(());
    };
    match state.backend.restore_session(saved).await {
        Ok(Some(session)) => file.save(&session)?,
        Ok(None) => {
            tracing::info!("Saved session is no longer valid");
            file.clear()?;
        }
        Err(e) => tracing::warn!("Could not restore session: {}", e),
    }
    Ok(())
}

pub async fn run(state: &AppState, command: Command) -> anyhow::Result<()> {
    restore(state).await?;
    let snapshot = state.store.init().await;

    match snapshot.route(&state.guard, command.route()) {
        GuardDecision::Redirect(to) if to == state.guard.landing() => {
            anyhow::bail!("You must be signed in to do that. Run `souk login` first.");
        }
        GuardDecision::Redirect(to) => {
            let who = snapshot.user().map(|u| u.email.as_str()).unwrap_or_default();
            println!("Already signed in as {} (continue at {})", who, to);
            return Ok(());
        }
        GuardDecision::Stay => {}
    }

    let result = dispatch(state, command).await;

    // Keep any refreshed tokens for the next invocation
    if let Ok(Some(session)) = state.backend.current_session().await {
        state.session_file().save(&session)?;
    }
    state.store.teardown();
    result
}

async fn dispatch(state: &AppState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Signup {
            username,
            email,
            password,
            account_type,
        } => {
            let form = SignUpForm {
                username,
                email,
                password,
                account_type: Some(account_type),
            };
            let outcome = state.account_flow().sign_up(&form).await?;
            match outcome.session {
                Some(session) => {
                    state.session_file().save(&session)?;
                    println!("Welcome, {}! You are signed in.", form.username.trim());
                }
                None => println!("Check {} to confirm your account.", outcome.identity.email),
            }
        }
        Command::Login { email, password } => {
            let session = state
                .account_flow()
                .sign_in(&SignInForm { email, password })
                .await?;
            state.session_file().save(&session)?;
            println!("Signed in as {}", session.user.email);
        }
        Command::Logout => {
            if state.store.snapshot().user().is_some() {
                state.store.sign_out().await?;
            }
            state.session_file().clear()?;
            println!("Signed out.");
        }
        Command::Whoami => {
            let snapshot = state.store.snapshot();
            let user = snapshot.user().context("Not signed in")?;
            match snapshot.profile.as_ref() {
                Some(profile) => println!(
                    "{} <{}> @{} ({})",
                    profile.display_name(),
                    user.email,
                    profile.username,
                    profile.title()
                ),
                None => println!("{} (no profile yet)", user.email),
            }
        }
        Command::Feed => {
            let entries = state.display_flow().feed().await?;
            if entries.is_empty() {
                println!("No posts yet.");
            }
            for entry in entries {
                println!(
                    "{} ({}) · {}",
                    entry.author_name, entry.author_title, entry.item.post.created_at
                );
                if let Some(content) = entry.item.post.content.as_deref() {
                    println!("  {}", content);
                }
                if let Some(url) = entry.image_url.as_deref() {
                    println!("  [image] {}", url);
                }
                println!(
                    "  {} comment(s), {} like(s)\n",
                    entry.item.comment_count, entry.item.like_count
                );
            }
        }
        Command::Post { content, image } => {
            let flow = state.post_flow();
            let mut composer = PostComposer::new();
            if let Some(content) = content {
                composer.set_content(content);
            }
            if let Some(path) = image {
                let file = media::load_image(&path)
                    .with_context(|| format!("Could not read {}", path.display()))?;
                composer.attach_image(file, flow.max_image_bytes())?;
            }
            flow.submit(&mut composer, |post| {
                println!("Post created successfully! ({})", post.id);
            })
            .await?;
        }
        Command::Listing(ListingCommand::Create(args)) => {
            let flow = state.listing_flow();
            let mut form = ListingForm::default();
            form.title = args.title;
            form.description = args.description;
            form.price = args.price;
            form.category_id = Some(args.category);
            form.condition = args.condition;
            let files = args
                .images
                .iter()
                .map(|path| {
                    media::load_image(path)
                        .with_context(|| format!("Could not read {}", path.display()))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            form.add_images(files, flow.max_images())?;
            let listing = flow.submit(&form).await?;
            println!("{} ({})", LISTING_CREATED, listing.id);
        }
        Command::Listing(ListingCommand::Show { id }) => {
            let Some(view) = state.display_flow().listing(id).await? else {
                anyhow::bail!("Listing not found.");
            };
            let listing = &view.detail.listing;
            println!("{} · {}", listing.title, view.price_label());
            println!("Seller: {} · Condition: {}", view.seller_name, listing.condition);
            println!("{}", listing.description);
            for url in &view.image_urls {
                println!("  [image] {}", url);
            }
        }
        Command::Profile { username } => {
            let Some(page) = state.display_flow().profile_page(&username).await? else {
                anyhow::bail!("Profile not found.");
            };
            println!("{} (@{})", page.profile.display_name(), page.profile.username);
            println!("{}", page.profile.title());
            if let Some(bio) = page.profile.bio.as_deref() {
                println!("{}", bio);
            }
            println!("{} listing(s), {} post(s)", page.listing_count, page.post_count);
        }
        Command::Categories => {
            for category in state.display_flow().categories().await? {
                println!("{:>3}  {}", category.id, category.name);
            }
        }
        Command::Settings(SettingsCommand::General {
            username,
            bio,
            country,
        }) => {
            let profile = state.store.snapshot().profile.context("Profile not loaded")?;
            let mut settings = GeneralSettings::from_profile(&profile);
            if let Some(username) = username {
                settings.username = username;
            }
            if let Some(bio) = bio {
                settings.bio = bio;
            }
            if let Some(country) = country {
                settings.country = country;
            }
            state.settings_flow().save_general(&settings).await?;
            println!("Profile updated successfully!");
        }
        Command::Settings(SettingsCommand::About {
            fields,
            payments,
            offers,
        }) => {
            let profile = state.store.snapshot().profile.context("Profile not loaded")?;
            let mut settings = AboutSettings::from_profile(&profile);
            for (key, value) in fields {
                set_about_field(&mut settings, &key, value)?;
            }
            if let Some(payments) = payments {
                settings.accepted_payments = payments;
            }
            if let Some(offers) = offers {
                settings.what_i_offer = offers;
            }
            state.settings_flow().save_about(&settings).await?;
            println!("Profile updated successfully!");
        }
        Command::Avatar(AvatarCommand::Set { path }) => {
            let file = media::load_image(&path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            let profile = state.settings_flow().upload_avatar(file).await?;
            println!(
                "Avatar updated: {}",
                profile.avatar_url.as_deref().unwrap_or_default()
            );
        }
        Command::Avatar(AvatarCommand::Remove) => {
            state.settings_flow().remove_avatar().await?;
            println!("Avatar removed.");
        }
    }
    Ok(())
}

fn set_about_field(settings: &mut AboutSettings, key: &str, value: String) -> anyhow::Result<()> {
    let slot = match key {
        "age" => &mut settings.age,
        "gender" => &mut settings.gender,
        "ethnicity" => &mut settings.ethnicity,
        "body_size" => &mut settings.body_size,
        "shoe_size" => &mut settings.shoe_size,
        "will_show_face" => &mut settings.will_show_face,
        "occupation" => &mut settings.occupation,
        "tattoos" => &mut settings.tattoos,
        "piercings" => &mut settings.piercings,
        "hair_color" => &mut settings.hair_color,
        "eye_color" => &mut settings.eye_color,
        "smokes" => &mut settings.smokes,
        "drinks" => &mut settings.drinks,
        "height" => &mut settings.height,
        "relationship_status" => &mut settings.relationship_status,
        other => anyhow::bail!("Unknown profile field: {}", other),
    };
    *slot = value;
    Ok(())
}
