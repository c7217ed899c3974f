//! Interactive shell: reads commands line by line and dispatches them to
//! the handlers.
//!
//! The shell owns the vault and at most one [`Session`]. Every command
//! error is printed and the loop carries on.

use std::io::{self, Write as _};

use anyhow::{Result, anyhow, bail};
use tracing::info;

use strongroom_vault::{Session, UserRole, Vault};

use crate::handlers;

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register,
    Login,
    Logout,
    Passwd,
    List {
        term: Option<String>,
        category: Option<String>,
    },
    Show(i64),
    Add,
    Edit(i64),
    Recreate(i64),
    Delete(i64),
    History(i64),
    Check,
    Grant {
        id: i64,
        username: String,
        level: i64,
    },
    Revoke {
        id: i64,
        username: String,
    },
    Grants(i64),
    Users,
    AddUser {
        username: String,
        role: UserRole,
    },
    Role {
        username: String,
        role: UserRole,
    },
    DelUser(String),
    Stats,
    GenPass(Option<usize>),
    Help,
    Quit,
}

impl Command {
    /// Commands that work without a session or while a password change is
    /// pending.
    fn is_always_allowed(&self) -> bool {
        matches!(
            self,
            Self::Register
                | Self::Login
                | Self::Logout
                | Self::Passwd
                | Self::GenPass(_)
                | Self::Help
                | Self::Quit
        )
    }
}

pub const HELP: &str = "\
Accounts:
  register                    create an account (role: user)
  login / logout              start or end a session
  passwd                      change your master password
Secrets:
  list [-c CATEGORY] [TERM]   list visible secrets, optionally filtered
  show ID                     show a secret including its value
  add                         create a secret
  edit ID                     change fields of a secret
  recreate ID                 overwrite the value of an undecryptable secret
  delete ID                   delete a secret (asks for confirmation)
  history ID                  audit trail of a secret
  check                       list secrets that do not decrypt with your key
  genpass [N]                 generate a random password (default 12)
Sharing (manager, admin):
  grant ID USER [LEVEL]       record that USER may use secret ID
  revoke ID USER              remove that record
  grants ID                   list grants on a secret
Administration (admin):
  users                       list accounts
  adduser USER ROLE           create an account with a role
  role USER ROLE              change a user's role
  deluser USER                delete an account
  stats                       counts and recent activity
Other:
  help, quit";

/// Parse one input line.
pub fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        bail!("empty command");
    };
    let args: Vec<&str> = words.collect();

    let command = match name.to_ascii_lowercase().as_str() {
        "register" => Command::Register,
        "login" => Command::Login,
        "logout" => Command::Logout,
        "passwd" => Command::Passwd,
        "list" | "ls" => parse_list(&args)?,
        "show" => Command::Show(id_arg(&args)?),
        "add" => Command::Add,
        "edit" => Command::Edit(id_arg(&args)?),
        "recreate" => Command::Recreate(id_arg(&args)?),
        "delete" | "rm" => Command::Delete(id_arg(&args)?),
        "history" => Command::History(id_arg(&args)?),
        "check" => Command::Check,
        "grant" => {
            let (id, username) = id_and_user(&args, "grant ID USER [LEVEL]")?;
            let level = match args.get(2) {
                Some(level) => level
                    .parse()
                    .map_err(|_| anyhow!("invalid permission level: {level}"))?,
                None => 1,
            };
            Command::Grant {
                id,
                username,
                level,
            }
        }
        "revoke" => {
            let (id, username) = id_and_user(&args, "revoke ID USER")?;
            Command::Revoke { id, username }
        }
        "grants" => Command::Grants(id_arg(&args)?),
        "users" => Command::Users,
        "adduser" => {
            let (username, role) = user_and_role(&args, "adduser USER ROLE")?;
            Command::AddUser { username, role }
        }
        "role" => {
            let (username, role) = user_and_role(&args, "role USER ROLE")?;
            Command::Role { username, role }
        }
        "deluser" => match args.first() {
            Some(username) => Command::DelUser((*username).to_string()),
            None => bail!("usage: deluser USER"),
        },
        "stats" => Command::Stats,
        "genpass" => match args.first() {
            Some(n) => {
                let n: usize = n.parse().map_err(|_| anyhow!("invalid length: {n}"))?;
                if n == 0 {
                    bail!("length must be at least 1");
                }
                Command::GenPass(Some(n))
            }
            None => Command::GenPass(None),
        },
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command: {other} (type `help`)"),
    };
    Ok(command)
}

fn parse_list(args: &[&str]) -> Result<Command> {
    let mut category = None;
    let mut term = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" || *arg == "--category" {
            match iter.next() {
                Some(value) => category = Some((*value).to_string()),
                None => bail!("usage: list [-c CATEGORY] [TERM]"),
            }
        } else {
            term.push(*arg);
        }
    }
    Ok(Command::List {
        term: (!term.is_empty()).then(|| term.join(" ")),
        category,
    })
}

fn id_arg(args: &[&str]) -> Result<i64> {
    let raw = args.first().ok_or_else(|| anyhow!("missing secret ID"))?;
    raw.trim_start_matches('#')
        .parse()
        .map_err(|_| anyhow!("invalid secret ID: {raw}"))
}

fn id_and_user(args: &[&str], usage: &str) -> Result<(i64, String)> {
    if args.len() < 2 {
        bail!("usage: {usage}");
    }
    Ok((id_arg(args)?, args[1].to_string()))
}

fn user_and_role(args: &[&str], usage: &str) -> Result<(String, UserRole)> {
    if args.len() < 2 {
        bail!("usage: {usage}");
    }
    let role: UserRole = args[1].parse()?;
    Ok((args[0].to_string(), role))
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

pub struct Shell {
    pub vault: Vault,
    pub session: Option<Session>,
}

impl Shell {
    pub fn new(vault: Vault) -> Self {
        Self {
            vault,
            session: None,
        }
    }

    /// The active session, or an error telling the user to log in.
    pub fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| anyhow!("not logged in (use `login` or `register`)"))
    }

    fn prompt(&self) -> String {
        match &self.session {
            Some(session) => format!("{}@strongroom> ", session.username()),
            None => "strongroom> ".to_string(),
        }
    }

    /// Run the read-eval-print loop until `quit` or end of input.
    pub fn run(mut self) -> Result<()> {
        println!();
        println!("  Strongroom v{}", env!("CARGO_PKG_VERSION"));
        println!("  Type `login`, `register` or `help`.");
        println!();

        let stdin = io::stdin();
        let mut line_buf = String::new();

        loop {
            print!("{}", self.prompt());
            io::stdout().flush().ok();

            line_buf.clear();
            match stdin.read_line(&mut line_buf) {
                Ok(0) => {
                    println!();
                    info!("EOF received, exiting");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("  Error reading input: {e}");
                    continue;
                }
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let command = match parse_command(trimmed) {
                Ok(command) => command,
                Err(e) => {
                    eprintln!("  {e}");
                    continue;
                }
            };
            if command == Command::Quit {
                info!("user requested exit");
                break;
            }

            if let Err(e) = self.dispatch(command) {
                eprintln!("  Error: {e:#}");
            }
        }

        if let Some(session) = self.session.take() {
            self.vault.logout(session);
        }
        info!("shutting down");
        Ok(())
    }

    fn dispatch(&mut self, command: Command) -> Result<()> {
        if !command.is_always_allowed() {
            let session = self.session()?;
            if session.must_change_password() {
                bail!("password change required; run `passwd` first");
            }
        }

        match command {
            Command::Register => handlers::register(self),
            Command::Login => handlers::login(self),
            Command::Logout => handlers::logout(self),
            Command::Passwd => handlers::passwd(self),
            Command::List { term, category } => handlers::list(self, term, category),
            Command::Show(id) => handlers::show(self, id),
            Command::Add => handlers::add(self),
            Command::Edit(id) => handlers::edit(self, id),
            Command::Recreate(id) => handlers::recreate(self, id),
            Command::Delete(id) => handlers::delete(self, id),
            Command::History(id) => handlers::history(self, id),
            Command::Check => handlers::check(self),
            Command::Grant {
                id,
                username,
                level,
            } => handlers::grant(self, id, &username, level),
            Command::Revoke { id, username } => handlers::revoke(self, id, &username),
            Command::Grants(id) => handlers::grants(self, id),
            Command::Users => handlers::users(self),
            Command::AddUser { username, role } => handlers::add_user(self, &username, role),
            Command::Role { username, role } => handlers::change_role(self, &username, role),
            Command::DelUser(username) => handlers::delete_user(self, &username),
            Command::Stats => handlers::stats(self),
            Command::GenPass(length) => handlers::genpass(length),
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_command("login").unwrap(), Command::Login);
        assert_eq!(parse_command("  QUIT ").unwrap(), Command::Quit);
        assert_eq!(parse_command("show 7").unwrap(), Command::Show(7));
        assert_eq!(parse_command("delete #3").unwrap(), Command::Delete(3));
        assert_eq!(parse_command("genpass").unwrap(), Command::GenPass(None));
        assert_eq!(parse_command("genpass 20").unwrap(), Command::GenPass(Some(20)));
    }

    #[test]
    fn parses_list_filters() {
        assert_eq!(
            parse_command("list").unwrap(),
            Command::List {
                term: None,
                category: None
            }
        );
        assert_eq!(
            parse_command("list -c Work git hub").unwrap(),
            Command::List {
                term: Some("git hub".into()),
                category: Some("Work".into())
            }
        );
        assert!(parse_command("list -c").is_err());
    }

    #[test]
    fn parses_grants_and_roles() {
        assert_eq!(
            parse_command("grant 4 bob").unwrap(),
            Command::Grant {
                id: 4,
                username: "bob".into(),
                level: 1
            }
        );
        assert_eq!(
            parse_command("grant 4 bob 2").unwrap(),
            Command::Grant {
                id: 4,
                username: "bob".into(),
                level: 2
            }
        );
        assert_eq!(
            parse_command("role bob Manager").unwrap(),
            Command::Role {
                username: "bob".into(),
                role: UserRole::Manager
            }
        );
        assert!(parse_command("role bob root").is_err());
        assert!(parse_command("adduser bob").is_err());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("").is_err());
        assert!(parse_command("show").is_err());
        assert!(parse_command("show abc").is_err());
        assert!(parse_command("genpass 0").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn session_free_commands() {
        assert!(Command::Login.is_always_allowed());
        assert!(Command::Passwd.is_always_allowed());
        assert!(!Command::Add.is_always_allowed());
        assert!(!Command::Show(1).is_always_allowed());
    }
}
