use std::{
    error::Error,
    io::{self},
    path::Path,
    process::exit,
};

use clap::Parser;
use rusqlite::Connection;
use serde_json::Value;

use finsync::{UserID, create_link, create_user, initialize_db};

/// A utility for recording a completed institution link so that the server
/// can sync its transactions.
///
/// The access token is read from stdin so it does not end up in the shell
/// history.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database. Created if it does not exist.
    #[arg(long)]
    db_path: String,

    /// The identity provider's ID for the user, e.g. "0b6f7c2e-...".
    #[arg(long)]
    user_id: UserID,

    /// The provider's ID for the institution, e.g. "ins_109508".
    #[arg(long)]
    institution_id: String,

    /// The accounts reported when the link was made, as a JSON array.
    #[arg(long, default_value = "[]")]
    accounts: Value,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let db_path = Path::new(&args.db_path);
    validate_db_path(db_path);

    if !args.accounts.is_array() {
        print_error("Accounts must be a JSON array.");
        exit(1);
    }

    let access_token = match read_access_token() {
        Some(access_token) => access_token,
        None => return Ok(()),
    };

    println!("Linking {} for user {}", args.institution_id, args.user_id);

    let mut conn = Connection::open(db_path)?;
    initialize_db(&conn)?;

    let transaction = conn.transaction()?;
    create_user(args.user_id, &transaction)?;
    let link = match create_link(
        args.user_id,
        &args.institution_id,
        &access_token,
        &args.accounts,
        &transaction,
    ) {
        Ok(link) => link,
        Err(error) => {
            print_error(format!("Could not create link: {error}"));
            exit(1);
        }
    };
    transaction.commit()?;

    println!("Linked {}. The first sync will fetch the full history.", link.institution_id);

    Ok(())
}

fn validate_db_path(db_path: &Path) {
    match db_path.extension() {
        None => {
            print_error("Database path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            print_error("Database path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        _ => {}
    }
}

fn read_access_token() -> Option<String> {
    loop {
        let access_token = match rpassword::prompt_password("Enter the access token: ") {
            Ok(string) => string.trim().to_owned(),
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                return None;
            }
            Err(error) => {
                print_error(format!("Could not read access token from stdin: {error}"));
                return None;
            }
        };

        if access_token.is_empty() {
            print_error("The access token cannot be empty, try again.");
            continue;
        }

        return Some(access_token);
    }
}

fn print_error(error: impl ToString) {
    eprintln!("\x1b[31;1m{}\x1b[0m", error.to_string())
}
