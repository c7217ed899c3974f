//! Command handlers.
//!
//! Each handler collects input with `dialoguer`, calls exactly one vault
//! operation and prints the outcome. Errors bubble up to the shell, which
//! prints them.

use anyhow::{Result, bail};
use dialoguer::{Confirm, Input, Password, Select};

use strongroom_vault::crypto::DEFAULT_PASSWORD_LENGTH;
use strongroom_vault::{
    NewSecret, SUGGESTED_CATEGORIES, SecretFilter, SecretUpdate, UserRole, VaultError, Visibility,
    generate_password,
};

use crate::helpers;
use crate::shell::Shell;

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn ask(prompt: &str) -> Result<String> {
    Ok(Input::<String>::new().with_prompt(prompt).interact_text()?)
}

fn ask_optional(prompt: &str, current: Option<&str>) -> Result<String> {
    let input = Input::<String>::new().with_prompt(prompt).allow_empty(true);
    let input = match current {
        Some(current) => input.with_initial_text(current),
        None => input,
    };
    Ok(input.interact_text()?)
}

fn ask_password(prompt: &str) -> Result<String> {
    Ok(Password::new().with_prompt(prompt).interact()?)
}

fn ask_new_password(prompt: &str) -> Result<String> {
    Ok(Password::new()
        .with_prompt(prompt)
        .with_confirmation("Confirm", "Entries do not match")
        .interact()?)
}

fn confirm(prompt: &str) -> bool {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn choose_category(current: Option<&str>) -> Result<String> {
    let default = current
        .and_then(|c| SUGGESTED_CATEGORIES.iter().position(|s| *s == c))
        .unwrap_or(0);
    let mut items: Vec<&str> = SUGGESTED_CATEGORIES.to_vec();
    items.push("Custom...");

    let choice = Select::new()
        .with_prompt("Category")
        .items(&items[..])
        .default(default)
        .interact()?;
    if choice < SUGGESTED_CATEGORIES.len() {
        Ok(SUGGESTED_CATEGORIES[choice].to_string())
    } else {
        ask_optional("Category name", current)
    }
}

/// Ask for a secret value, offering a generated one.
fn ask_secret_value(prompt: &str) -> Result<String> {
    if confirm("Generate a random password?") {
        let generated = generate_password(DEFAULT_PASSWORD_LENGTH)?;
        println!("  Generated: {generated}");
        return Ok(generated);
    }
    Ok(Password::new()
        .with_prompt(prompt)
        .with_confirmation("Confirm", "Entries do not match")
        .allow_empty_password(true)
        .interact()?)
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

pub fn register(shell: &mut Shell) -> Result<()> {
    if shell.session.is_some() {
        bail!("log out first");
    }
    let username = ask("Username")?;
    let password = ask_new_password("Master password")?;
    let user = shell.vault.register(&username, &password)?;
    println!("  Account '{}' created. You can now `login`.", user.username);
    Ok(())
}

pub fn login(shell: &mut Shell) -> Result<()> {
    if let Some(session) = &shell.session {
        bail!("already logged in as {}", session.username());
    }
    let username = ask("Username")?;
    let password = ask_password("Master password")?;
    let session = shell.vault.login(&username, &password)?;
    println!(
        "  Logged in as {} ({}).",
        session.username(),
        session.role()
    );
    let must_change = session.must_change_password();
    shell.session = Some(session);

    if must_change {
        println!("  This account still uses its initial password and must change it now.");
        passwd(shell)?;
    }
    Ok(())
}

pub fn logout(shell: &mut Shell) -> Result<()> {
    match shell.session.take() {
        Some(session) => {
            let name = session.username().to_string();
            shell.vault.logout(session);
            println!("  {name} logged out.");
            Ok(())
        }
        None => bail!("not logged in"),
    }
}

pub fn passwd(shell: &mut Shell) -> Result<()> {
    let session = shell.session()?;
    let current = ask_password("Current password")?;
    let new = ask_new_password("New password")?;

    let change = shell.vault.change_password(session, &current, &new)?;
    println!(
        "  Password changed. {} secret(s) re-encrypted.",
        change.reencrypted
    );
    if change.undecryptable > 0 {
        println!(
            "  {} secret(s) were already undecryptable and were left as they are; see `check`.",
            change.undecryptable
        );
    }
    shell.session = Some(change.session);
    Ok(())
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

pub fn list(shell: &mut Shell, term: Option<String>, category: Option<String>) -> Result<()> {
    let session = shell.session()?;
    let filter = SecretFilter {
        search: term,
        category,
    };
    let secrets = shell.vault.list_secrets(session, &filter)?;
    if secrets.is_empty() {
        println!("  No secrets.");
        return Ok(());
    }
    println!("{}", helpers::secret_header());
    for secret in &secrets {
        println!("{}", helpers::secret_row(secret));
    }
    println!("  {} secret(s).", secrets.len());
    Ok(())
}

pub fn show(shell: &mut Shell, id: i64) -> Result<()> {
    let session = shell.session()?;
    match shell.vault.open_secret(session, id) {
        Ok(opened) => {
            for line in helpers::secret_details(&opened.secret) {
                println!("  {line}");
            }
            println!("  Value:      {}", opened.value());
            Ok(())
        }
        Err(VaultError::DecryptionFailed { .. }) => {
            let secret = shell.vault.get_secret(session, id)?;
            for line in helpers::secret_details(&secret) {
                println!("  {line}");
            }
            println!("  Value:      <cannot be decrypted with your current key>");
            println!("  Use `recreate {id}` to set a new value.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn add(shell: &mut Shell) -> Result<()> {
    let session = shell.session()?;

    let title = ask("Title")?;
    let login = ask_optional("Login (optional)", None)?;
    let value = ask_secret_value("Password")?;
    let url = ask_optional("URL (optional)", None)?;
    let notes = ask_optional("Notes (optional)", None)?;
    let category = choose_category(None)?;

    let mut secret = NewSecret::new(title, value)
        .with_login(login)
        .with_url(url)
        .with_notes(notes)
        .with_category(category);
    if session.role() == UserRole::Admin && confirm("Restricted visibility?") {
        secret = secret.restricted();
    }

    let id = shell.vault.create_secret(session, secret)?;
    println!("  Secret #{id} created.");
    Ok(())
}

pub fn edit(shell: &mut Shell, id: i64) -> Result<()> {
    let session = shell.session()?;
    let current = shell.vault.get_secret(session, id)?;

    let mut update = SecretUpdate {
        title: Some(ask_optional("Title", Some(&current.title))?),
        login: Some(ask_optional("Login", current.login.as_deref())?),
        url: Some(ask_optional("URL", current.url.as_deref())?),
        notes: Some(ask_optional("Notes", current.notes.as_deref())?),
        category: Some(choose_category(Some(&current.category))?),
        ..SecretUpdate::default()
    };
    if confirm("Change the password value?") {
        update.value = Some(ask_secret_value("New password")?);
    }
    if session.role() == UserRole::Admin {
        let restricted = Confirm::new()
            .with_prompt("Restricted visibility?")
            .default(current.visibility == Visibility::Restricted)
            .interact()?;
        update.visibility = Some(if restricted {
            Visibility::Restricted
        } else {
            Visibility::Normal
        });
    }

    if shell.vault.update_secret(session, id, update)? {
        println!("  Secret #{id} updated.");
    } else {
        println!("  Nothing changed.");
    }
    Ok(())
}

pub fn recreate(shell: &mut Shell, id: i64) -> Result<()> {
    let session = shell.session()?;
    let secret = shell.vault.get_secret(session, id)?;
    println!("  Setting a new value for '{}'.", secret.title);

    let value = ask_secret_value("New password")?;
    if shell.vault.recreate_secret_value(session, id, &value)? {
        println!("  Secret #{id} now decrypts with your key.");
    } else {
        println!("  Value unchanged.");
    }
    Ok(())
}

pub fn delete(shell: &mut Shell, id: i64) -> Result<()> {
    let session = shell.session()?;
    let deleted = shell.vault.delete_secret(session, id, |secret| {
        confirm(&format!("Delete '{}' (#{})?", secret.title, secret.id))
    })?;
    if deleted {
        println!("  Secret #{id} deleted.");
    } else {
        println!("  Cancelled.");
    }
    Ok(())
}

pub fn history(shell: &mut Shell, id: i64) -> Result<()> {
    let session = shell.session()?;
    let entries = shell.vault.history(session, id)?;
    if entries.is_empty() {
        println!("  No history.");
    }
    for entry in &entries {
        println!("  {}", helpers::history_row(entry));
    }
    Ok(())
}

pub fn check(shell: &mut Shell) -> Result<()> {
    let session = shell.session()?;
    let broken = shell.vault.check_integrity(session)?;
    if broken.is_empty() {
        println!("  All visible secrets decrypt with your key.");
        return Ok(());
    }
    println!("  {} secret(s) cannot be decrypted with your key:", broken.len());
    for secret in &broken {
        println!("{}", helpers::secret_row(secret));
    }
    println!("  Use `recreate ID` to set a new value.");
    Ok(())
}

pub fn genpass(length: Option<usize>) -> Result<()> {
    let password = generate_password(length.unwrap_or(DEFAULT_PASSWORD_LENGTH))?;
    println!("  {password}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Sharing
// ---------------------------------------------------------------------------

pub fn grant(shell: &mut Shell, id: i64, username: &str, level: i64) -> Result<()> {
    let session = shell.session()?;
    shell.vault.grant_access(session, id, username, level)?;
    println!("  Granted {username} level {level} on #{id}.");
    Ok(())
}

pub fn revoke(shell: &mut Shell, id: i64, username: &str) -> Result<()> {
    let session = shell.session()?;
    if shell.vault.revoke_access(session, id, username)? {
        println!("  Revoked {username} on #{id}.");
    } else {
        println!("  {username} had no grant on #{id}.");
    }
    Ok(())
}

pub fn grants(shell: &mut Shell, id: i64) -> Result<()> {
    let session = shell.session()?;
    let grants = shell.vault.list_grants(session, id)?;
    if grants.is_empty() {
        println!("  No grants on #{id}.");
    }
    for grant in &grants {
        println!("  {}", helpers::grant_row(grant));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Administration
// ---------------------------------------------------------------------------

pub fn users(shell: &mut Shell) -> Result<()> {
    let session = shell.session()?;
    for user in shell.vault.list_users(session)? {
        println!("  {}", helpers::user_row(&user));
    }
    Ok(())
}

pub fn add_user(shell: &mut Shell, username: &str, role: UserRole) -> Result<()> {
    let session = shell.session()?;
    let password = ask_new_password("Initial password")?;
    let user = shell.vault.create_user(session, username, &password, role)?;
    println!(
        "  Account '{}' ({}) created; they must change the password at first login.",
        user.username, user.role
    );
    Ok(())
}

pub fn change_role(shell: &mut Shell, username: &str, role: UserRole) -> Result<()> {
    let session = shell.session()?;
    if shell.vault.change_role(session, username, role)? {
        println!("  {username} is now {role}.");
    } else {
        println!("  {username} already has role {role}.");
    }
    Ok(())
}

pub fn delete_user(shell: &mut Shell, username: &str) -> Result<()> {
    let session = shell.session()?;
    let deleted = shell.vault.delete_user(session, username, |user| {
        confirm(&format!(
            "Delete account '{}' ({})? Their secrets stay in the vault.",
            user.username, user.role
        ))
    })?;
    if deleted {
        println!("  Account '{username}' deleted.");
    } else {
        println!("  Cancelled.");
    }
    Ok(())
}

pub fn stats(shell: &mut Shell) -> Result<()> {
    let session = shell.session()?;
    let stats = shell.vault.statistics(session)?;
    println!("  Secrets:                {}", stats.total_secrets);
    println!("  Users:                  {}", stats.total_users);
    println!(
        "  Changes (last {} days): {}",
        strongroom_vault::vault::RECENT_ACTIVITY_DAYS,
        stats.recent_changes
    );

    let recent = shell.vault.recent_activity(session, 10)?;
    if !recent.is_empty() {
        println!("  Recent activity:");
        for entry in &recent {
            println!("    {}", helpers::history_row(entry));
        }
    }
    Ok(())
}
