use crate::achievements::{self, AchievementBoard, AchievementRules};
use crate::auth::{AuthSession, Identity, SignUpOutcome};
use crate::backend::SupabaseClient;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, MAX_DISPLAY_SECS};
use crate::error::MindfulError;
use crate::meditation::MeditationService;
use crate::models::SessionRecord;
use crate::profile::{self, PasswordChange, ProfileField};
use crate::reflection::{Reflection, ReflectionStep, DETAILED_MOODS, QUICK_MOODS, RATING_LABELS};
use crate::stats::{self, TimeRange};
use crate::timer::{format_clock, TimerPhase, TimerSnapshot};
use crate::transcript::Transcript;
use crate::Args;
use anyhow::{anyhow, Result};
use chrono::Local;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const TIME_UP: &str = "Time is up. Use /reflect to record how it went.";

pub struct Context {
    pub args: Args,
    pub config: Config,
    pub run_id: String,
    pub transcript: RefCell<Transcript>,
    pub backend: Rc<SupabaseClient>,
    pub clock: SystemClock,
    pub identity: RefCell<Identity>,
    pub meditation: RefCell<MeditationService<SupabaseClient>>,
    /// Answers survive a timer reset and a failed save
    pub reflection: RefCell<Option<Reflection>>,
}

impl Context {
    fn auth(&self) -> Option<AuthSession> {
        self.identity.borrow().current().cloned()
    }

    fn require_auth(&self) -> Result<AuthSession> {
        self.auth().ok_or_else(|| MindfulError::NotAuthenticated.into())
    }

    fn rules(&self) -> AchievementRules {
        AchievementRules::from(&self.config.achievements)
    }

    fn log(&self, write: impl FnOnce(&mut Transcript) -> Result<()>) {
        if let Err(e) = write(&mut self.transcript.borrow_mut()) {
            tracing::warn!(error = %e, "transcript write failed");
        }
    }

    /// Record a countdown that ran out since the last check
    fn poll_expiry(&self) -> bool {
        let mut meditation = self.meditation.borrow_mut();
        if !meditation.reap_ticker() {
            return false;
        }
        let duration = meditation.snapshot().duration;
        drop(meditation);
        self.log(|t| t.session_expired(duration));
        true
    }
}

/// Sit one session with a live countdown, reflect, then exit
pub fn run_sit(ctx: &Context, minutes: u32) -> Result<()> {
    let auth = ctx
        .auth()
        .ok_or_else(|| anyhow!("Not signed in. Run `mindful` and use /login <email> first."))?;
    let duration = minutes_to_secs(minutes)?;
    let mut rl = DefaultEditor::new()?;

    {
        let mut meditation = ctx.meditation.borrow_mut();
        meditation.set_tick_listener(Some(Arc::new(render_countdown)));
        meditation.start(duration)?;
    }
    ctx.log(|t| t.session_started(duration));
    println!("Sitting for {} minute(s). Breathe.", minutes);
    render_countdown(&ctx.meditation.borrow().snapshot());

    loop {
        std::thread::sleep(Duration::from_millis(200));
        if ctx.poll_expiry() {
            break;
        }
        if !ctx.meditation.borrow().snapshot().is_active() {
            return Err(anyhow!("The session ended before the countdown finished"));
        }
    }

    reflect_and_complete(ctx, &mut rl, &auth)
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = dirs::home_dir().map(|h| h.join(".mindful").join("history.txt"));
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    println!("mindful - type /help for commands, /exit to quit");
    if let Some(auth) = ctx.auth() {
        println!("Signed in as {}", auth.user.email.as_deref().unwrap_or(auth.user_id()));
    } else {
        println!("Not signed in. Use /login <email> or /signup <email>.");
    }

    loop {
        if ctx.poll_expiry() {
            println!("{}", TIME_UP);
        }
        match rl.readline("~> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;
                if ctx.poll_expiry() {
                    println!("{}", TIME_UP);
                }

                if !line.starts_with('/') {
                    println!("Commands start with '/'. Type /help for the list.");
                    continue;
                }
                if handle_command(&ctx, &mut rl, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(e) = rl.save_history(path) {
            tracing::debug!(error = %e, "could not save history");
        }
    }
    ctx.meditation.borrow_mut().shutdown();
    Ok(())
}

fn handle_command(ctx: &Context, rl: &mut DefaultEditor, line: &str) -> bool {
    let parts = match shell_words::split(line) {
        Ok(parts) => parts,
        Err(e) => {
            println!("Could not parse command: {}", e);
            return false;
        }
    };
    let Some((cmd, args)) = parts.split_first() else {
        return false;
    };

    let result = match cmd.as_str() {
        "/exit" | "/quit" => return true,
        "/help" => {
            print_help();
            Ok(())
        }
        "/start" => cmd_start(ctx, args),
        "/presets" => {
            print_presets(&ctx.config);
            Ok(())
        }
        "/pause" => cmd_transition(ctx, "pause"),
        "/resume" => cmd_transition(ctx, "resume"),
        "/stop" => cmd_transition(ctx, "stop"),
        "/reset" => cmd_transition(ctx, "reset"),
        "/status" => {
            print_status(&ctx.meditation.borrow().snapshot());
            println!("Run: {}", ctx.run_id);
            println!("Transcript: {:?}", ctx.transcript.borrow().path);
            Ok(())
        }
        "/reflect" => ctx
            .require_auth()
            .and_then(|auth| reflect_and_complete(ctx, rl, &auth)),
        "/recent" => cmd_recent(ctx),
        "/progress" => cmd_progress(ctx, args),
        "/achievements" => cmd_achievements(ctx),
        "/login" => cmd_login(ctx, rl, args),
        "/signup" => cmd_signup(ctx, rl, args),
        "/logout" => cmd_logout(ctx),
        "/whoami" => cmd_whoami(ctx),
        "/profile" => cmd_profile(ctx, args),
        "/avatar" => cmd_avatar(ctx, args),
        "/passwd" => cmd_passwd(ctx, rl),
        other => {
            println!("Unknown command: {}. Type /help for the list.", other);
            Ok(())
        }
    };

    if let Err(e) = result {
        report(&e);
    }
    false
}

fn report(e: &anyhow::Error) {
    match e.downcast_ref::<MindfulError>() {
        Some(MindfulError::NotAuthenticated) => {
            println!("Not signed in. Use /login <email> or /signup <email>.")
        }
        Some(MindfulError::Validation(msg)) => println!("{}", msg),
        _ => println!("Error: {}", e),
    }
}

fn print_help() {
    println!("Session:");
    println!("  /start [minutes]   - begin a session (default from config)");
    println!("  /presets           - list suggested durations");
    println!("  /pause, /resume    - freeze or continue the countdown");
    println!("  /stop              - end the session early");
    println!("  /reset             - discard the current session");
    println!("  /status            - show the timer");
    println!("  /reflect           - record mood, rating and journal, then save");
    println!("Progress:");
    println!("  /recent                     - your latest sessions");
    println!("  /progress [week|month|year] - streaks, mood trends and insights");
    println!("  /achievements               - milestones and their progress");
    println!("Account:");
    println!("  /login <email>, /signup <email>, /logout, /whoami");
    println!("  /profile [set username|full_name <value>]");
    println!("  /avatar <image file>");
    println!("  /passwd            - change your password");
    println!("  /help, /exit");
}

fn print_presets(config: &Config) {
    println!("Presets:");
    for secs in &config.timer.presets {
        println!("  /start {:<3} ({})", secs / 60, format_clock(*secs));
    }
}

fn minutes_to_secs(minutes: u32) -> Result<u32> {
    let secs = minutes.checked_mul(60).filter(|s| (1..=MAX_DISPLAY_SECS).contains(s));
    secs.ok_or_else(|| {
        anyhow!(
            "Duration must be between 1 and {} minutes, got {}",
            MAX_DISPLAY_SECS / 60,
            minutes
        )
    })
}

fn parse_minutes(arg: &str) -> Result<u32> {
    let minutes: u32 = arg
        .parse()
        .map_err(|_| anyhow!("'{}' is not a whole number of minutes", arg))?;
    minutes_to_secs(minutes)
}

fn cmd_start(ctx: &Context, args: &[String]) -> Result<()> {
    let duration = match args.first() {
        Some(arg) => parse_minutes(arg)?,
        None => ctx.config.timer.default_duration_secs,
    };
    ctx.meditation.borrow_mut().start(duration)?;
    ctx.log(|t| t.session_started(duration));
    println!(
        "Meditating for {}. /pause, /resume or /stop as needed.",
        format_clock(duration)
    );
    Ok(())
}

fn cmd_transition(ctx: &Context, action: &str) -> Result<()> {
    let snapshot = {
        let mut meditation = ctx.meditation.borrow_mut();
        match action {
            "pause" => meditation.pause()?,
            "resume" => meditation.resume()?,
            "stop" => meditation.stop()?,
            _ => meditation.reset(),
        }
        meditation.snapshot()
    };
    let event = match action {
        "pause" => "session_paused",
        "resume" => "session_resumed",
        "stop" => "session_stopped",
        _ => "session_reset",
    };
    ctx.log(|t| t.session_transition(event, snapshot.remaining));
    print_status(&snapshot);
    Ok(())
}

fn print_status(snapshot: &TimerSnapshot) {
    println!(
        "{:<9} {}  {:>3.0}%",
        snapshot.phase.as_str(),
        snapshot.clock(),
        snapshot.progress
    );
    if snapshot.is_paused() {
        println!("Use /resume to continue, or /stop to end early.");
    }
    if snapshot.phase == TimerPhase::Completed {
        println!("Use /reflect to record how it went, or /reset to discard it.");
    }
}

fn render_countdown(snapshot: &TimerSnapshot) {
    let mut out = std::io::stdout();
    if snapshot.phase == TimerPhase::Completed {
        let _ = writeln!(out, "\r  {}  100%  Time is up.", format_clock(0));
    } else {
        let _ = write!(out, "\r  {}  {:>3.0}%  ", snapshot.clock(), snapshot.progress);
    }
    let _ = out.flush();
}

fn ask(rl: &mut DefaultEditor, prompt: &str) -> Result<Option<String>> {
    match rl.readline(prompt) {
        Ok(line) => Ok(Some(line.trim().to_string())),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A catalog number or a mood name
fn mood_choice(input: &str) -> String {
    let catalog: Vec<&str> = QUICK_MOODS.iter().chain(DETAILED_MOODS.iter()).copied().collect();
    match input.parse::<usize>() {
        Ok(n) if (1..=catalog.len()).contains(&n) => catalog[n - 1].to_string(),
        _ => input.to_string(),
    }
}

fn stars(rating: u8) -> String {
    let filled = rating.min(5) as usize;
    format!("{}{}", "*".repeat(filled), ".".repeat(5 - filled))
}

/// Walk the reflection steps. Returns false if the user backed out.
fn run_reflection(rl: &mut DefaultEditor, r: &mut Reflection, observations: &[String]) -> Result<bool> {
    loop {
        println!("\n{}", r.step().title());
        match r.step() {
            ReflectionStep::Mood => {
                for (i, mood) in QUICK_MOODS.iter().chain(DETAILED_MOODS.iter()).enumerate() {
                    print!("{:>2}) {:<12}", i + 1, mood);
                    if (i + 1) % 5 == 0 {
                        println!();
                    }
                }
                println!();
                let Some(answer) = ask(rl, "Mood (number or name): ")? else {
                    return Ok(false);
                };
                if !(answer.is_empty() && r.mood().is_some()) {
                    if let Err(e) = r.set_mood(&mood_choice(&answer)) {
                        println!("{}", e);
                        continue;
                    }
                }
            }
            ReflectionStep::Rating => {
                for (i, label) in RATING_LABELS.iter().enumerate() {
                    println!("  {}) {}", i + 1, label);
                }
                let Some(answer) = ask(rl, "Rating (1-5, b to go back): ")? else {
                    return Ok(false);
                };
                if answer == "b" {
                    r.previous();
                    continue;
                }
                let parsed = answer
                    .parse::<u8>()
                    .map_err(|_| MindfulError::validation("Enter a number from 1 to 5"))
                    .and_then(|n| r.set_rating(n));
                if let Err(e) = parsed {
                    println!("{}", e);
                    continue;
                }
            }
            ReflectionStep::Journal => {
                println!(
                    "Up to {} characters; empty to keep, - to clear, b to go back.",
                    r.remaining_chars() + r.journal().chars().count()
                );
                if !r.journal().is_empty() {
                    println!("  Current: {}", r.journal());
                }
                let Some(answer) = ask(rl, "Journal: ")? else {
                    return Ok(false);
                };
                match answer.as_str() {
                    "b" => {
                        r.previous();
                        continue;
                    }
                    "-" => r.clear_journal(),
                    "" => {}
                    text => {
                        if let Err(e) = r.set_journal(text) {
                            println!("{}", e);
                            continue;
                        }
                    }
                }
            }
            ReflectionStep::Insights => {
                println!("  Mood:    {}", r.mood().unwrap_or("-"));
                if let Some(rating) = r.rating() {
                    println!(
                        "  Session: {} {}",
                        stars(rating),
                        RATING_LABELS[usize::from(rating.clamp(1, 5)) - 1]
                    );
                }
                if !r.journal().is_empty() {
                    println!("  Journal: {}", r.journal());
                }
                for line in observations {
                    println!("  - {}", line);
                }
                let Some(answer) = ask(rl, "Save this reflection? [Y/n/b] ")? else {
                    return Ok(false);
                };
                match answer.to_ascii_lowercase().as_str() {
                    "b" => {
                        r.previous();
                        continue;
                    }
                    "n" | "no" => return Ok(false),
                    _ => return Ok(true),
                }
            }
        }
        r.next()?;
    }
}

fn reflect_and_complete(ctx: &Context, rl: &mut DefaultEditor, auth: &AuthSession) -> Result<()> {
    if ctx.meditation.borrow().current_session().is_none() {
        println!("No session to reflect on. Start one with /start.");
        return Ok(());
    }

    let observations = stats::insights(ctx.meditation.borrow().recent_sessions(), ctx.clock.today())
        .observations;
    let input = {
        let mut slot = ctx.reflection.borrow_mut();
        let reflection = slot.get_or_insert_with(|| Reflection::new(ctx.config.journal.max_chars));
        if !run_reflection(rl, reflection, &observations)? {
            println!("Reflection kept; /reflect picks up where you left off.");
            return Ok(());
        }
        reflection.finish()?
    };

    let result = ctx.meditation.borrow_mut().complete_session(
        Some(auth),
        &input.mood,
        input.rating,
        input.journal.as_deref(),
    );
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            let message = e.to_string();
            ctx.log(|t| t.completion_failed(&message));
            println!("Your answers are kept; run /reflect again to retry.");
            return Err(e.into());
        }
    };

    *ctx.reflection.borrow_mut() = None;
    ctx.log(|t| {
        t.session_completed(
            report.duration,
            &input.mood,
            input.rating,
            report.streak.current_streak,
        )
    });
    println!(
        "Saved. Streak: {} day(s) (best {}).",
        report.streak.current_streak, report.streak.longest_streak
    );

    match achievements::sync(ctx.backend.as_ref(), Some(auth), ctx.rules()) {
        Ok(board) => announce_unlocks(ctx, &board),
        Err(e) => tracing::warn!(error = %e, "achievement sync failed"),
    }
    Ok(())
}

fn announce_unlocks(ctx: &Context, board: &AchievementBoard) {
    for achievement in &board.newly_unlocked {
        println!(
            "Achievement unlocked: {} {}",
            achievement.icon.as_deref().unwrap_or("*"),
            achievement.title
        );
        ctx.log(|t| t.achievement_unlocked(&achievement.id, &achievement.title));
    }
}

fn print_session(record: &SessionRecord) {
    let when = record
        .created_at
        .map(|t| t.with_timezone(&Local).format("%a %b %e %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let rating = record.rating.map(stars).unwrap_or_default();
    println!(
        "  {}  {:>3} min  {:<10} {}",
        when,
        record.duration / 60,
        record.mood.as_deref().unwrap_or("-"),
        rating
    );
    if let Some(journal) = &record.journal_text {
        let preview: String = journal.chars().take(60).collect();
        let ellipsis = if journal.chars().count() > 60 { "..." } else { "" };
        println!("      \"{}{}\"", preview, ellipsis);
    }
}

fn cmd_recent(ctx: &Context) -> Result<()> {
    let auth = ctx.require_auth()?;
    let mut meditation = ctx.meditation.borrow_mut();
    let recent = meditation.load_recent_sessions(Some(&auth))?;
    if recent.is_empty() {
        println!("No sessions yet. Start one with /start.");
        return Ok(());
    }
    println!("Recent sessions:");
    for record in recent {
        print_session(record);
    }
    Ok(())
}

fn cmd_progress(ctx: &Context, args: &[String]) -> Result<()> {
    let range = match args.first() {
        Some(arg) => TimeRange::parse(arg).ok_or_else(|| anyhow!("Unknown range '{}'. Use week, month or year.", arg))?,
        None => TimeRange::Week,
    };
    let auth = ctx.require_auth()?;
    let dashboard = stats::load_dashboard(ctx.backend.as_ref(), Some(&auth), range, &ctx.clock)?;

    let s = &dashboard.summary;
    println!("Streak: {} day(s), best {}", s.current_streak, s.longest_streak);
    println!("This week: {}/7 days", s.days_this_week);
    println!("All time: {} session(s), {} minute(s)", s.total_sessions, s.total_minutes);

    let trend = &dashboard.trend;
    println!("\nMoods this {}:", range.as_str());
    if trend.counts.is_empty() {
        println!("  No reflections in this range.");
    }
    for (mood, count) in &trend.counts {
        println!("  {:<12} {}", mood, "#".repeat(*count));
    }
    if let Some(mood) = &trend.dominant {
        println!("  Most common: {}", mood);
    }
    if let Some(avg) = trend.average_rating {
        println!("  Average rating: {:.1}/5", avg);
    }

    println!("\nInsights:");
    for line in &dashboard.insights.observations {
        println!("  - {}", line);
    }
    println!("Suggestions:");
    for line in &dashboard.insights.suggestions {
        println!("  - {}", line);
    }
    Ok(())
}

fn cmd_achievements(ctx: &Context) -> Result<()> {
    let auth = ctx.require_auth()?;
    let board = achievements::sync(ctx.backend.as_ref(), Some(&auth), ctx.rules())?;
    announce_unlocks(ctx, &board);
    if board.views.is_empty() {
        println!("No achievements defined yet.");
        return Ok(());
    }
    println!("Achievements ({}/{} unlocked):", board.unlocked_count(), board.views.len());
    for view in &board.views {
        let a = &view.achievement;
        println!(
            "  [{}] {} {}  {}/{} ({:.0}%)",
            if view.unlocked { "x" } else { " " },
            a.icon.as_deref().unwrap_or("*"),
            a.title,
            view.display_progress(),
            a.requirement_value,
            view.percent()
        );
        if !a.description.is_empty() {
            println!("        {}", a.description);
        }
    }
    Ok(())
}

fn cmd_login(ctx: &Context, rl: &mut DefaultEditor, args: &[String]) -> Result<()> {
    let email = args.first().ok_or_else(|| anyhow!("Usage: /login <email>"))?;
    let Some(password) = ask(rl, "Password: ")? else {
        return Ok(());
    };
    let user_id = ctx
        .identity
        .borrow_mut()
        .sign_in(ctx.backend.as_ref(), email, &password)?
        .user_id()
        .to_string();
    ctx.meditation.borrow_mut().clear_user_data();
    ctx.log(|t| t.signed_in(&user_id));
    println!("Signed in as {}", email);
    Ok(())
}

fn cmd_signup(ctx: &Context, rl: &mut DefaultEditor, args: &[String]) -> Result<()> {
    let email = args.first().ok_or_else(|| anyhow!("Usage: /signup <email>"))?;
    let Some(password) = ask(rl, "Choose a password: ")? else {
        return Ok(());
    };
    let Some(confirm) = ask(rl, "Confirm password: ")? else {
        return Ok(());
    };
    if password != confirm {
        return Err(MindfulError::validation("Passwords do not match").into());
    }

    let outcome = ctx
        .identity
        .borrow_mut()
        .sign_up(ctx.backend.as_ref(), email, &password)?;
    match outcome {
        SignUpOutcome::Active(session) => {
            ctx.meditation.borrow_mut().clear_user_data();
            ctx.log(|t| t.signed_in(session.user_id()));
            println!("Account created. Signed in as {}", email);
        }
        SignUpOutcome::PendingVerification { email } => {
            println!("Check {} for a confirmation link, then /login.", email);
        }
    }
    Ok(())
}

fn cmd_logout(ctx: &Context) -> Result<()> {
    let user_id = ctx.identity.borrow_mut().sign_out(ctx.backend.as_ref())?;
    ctx.meditation.borrow_mut().clear_user_data();
    *ctx.reflection.borrow_mut() = None;
    ctx.log(|t| t.signed_out(&user_id));
    println!("Signed out.");
    Ok(())
}

fn cmd_whoami(ctx: &Context) -> Result<()> {
    let auth = ctx.require_auth()?;
    println!("Email: {}", auth.user.email.as_deref().unwrap_or("-"));
    println!("User id: {}", auth.user_id());
    if let Some(exp) = auth.expiry().and_then(|e| chrono::DateTime::from_timestamp(e, 0)) {
        println!("Session expires: {}", exp.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

fn cmd_profile(ctx: &Context, args: &[String]) -> Result<()> {
    let auth = ctx.require_auth()?;
    match args {
        [] => {
            let p = profile::load(ctx.backend.as_ref(), Some(&auth))?;
            println!("  [{}]", p.initials(auth.user.email.as_deref()));
            println!("  Username:  {}", p.username.as_deref().unwrap_or("-"));
            println!("  Full name: {}", p.full_name.as_deref().unwrap_or("-"));
            println!("  Avatar:    {}", p.avatar_url.as_deref().unwrap_or("-"));
            Ok(())
        }
        [set, field, value @ ..] if set == "set" && !value.is_empty() => {
            let field = ProfileField::parse(field)
                .ok_or_else(|| anyhow!("Unknown field '{}'. Use username or full_name.", field))?;
            profile::update_field(
                ctx.backend.as_ref(),
                Some(&auth),
                field,
                &value.join(" "),
                chrono::Utc::now(),
            )?;
            println!("Profile updated.");
            Ok(())
        }
        _ => Err(anyhow!("Usage: /profile [set username|full_name <value>]")),
    }
}

fn cmd_avatar(ctx: &Context, args: &[String]) -> Result<()> {
    let file = args.first().ok_or_else(|| anyhow!("Usage: /avatar <image file>"))?;
    let auth = ctx.require_auth()?;
    let url = profile::upload_avatar(
        ctx.backend.as_ref(),
        Some(&auth),
        Path::new(file),
        chrono::Utc::now(),
    )?;
    println!("Avatar updated: {}", url);
    Ok(())
}

fn cmd_passwd(ctx: &Context, rl: &mut DefaultEditor) -> Result<()> {
    let auth = ctx.require_auth()?;
    let Some(new_password) = ask(rl, "New password: ")? else {
        return Ok(());
    };
    let Some(confirm) = ask(rl, "Confirm new password: ")? else {
        return Ok(());
    };
    let change = PasswordChange {
        new_password,
        confirm,
    };
    profile::change_password(ctx.backend.as_ref(), Some(&auth), &change)?;
    println!("Password changed.");
    Ok(())
}
