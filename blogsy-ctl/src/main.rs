use anyhow::Context;
use blogsy_api::{AdminResetPassword, AuthToken, NewUser, User, UserId, Uuid};

#[derive(structopt::StructOpt)]
struct Opt {
    /// Base URL of the blogsy server, eg. `http://127.0.0.1:5000`
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user
    CreateUser {
        /// Username
        name: String,

        email: String,

        /// Initial password
        initial_password: String,
    },

    /// Set a new password for a user
    ResetPassword {
        /// Username
        name: String,

        new_password: String,
    },
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();
    let host = opt.host.trim_end_matches('/');

    let client = reqwest::Client::new();

    match opt.cmd {
        Command::CreateUser {
            name,
            email,
            initial_password,
        } => {
            let user: User = client
                .post(format!("{host}/api/admin/create-user"))
                .json(&NewUser::new(
                    UserId(Uuid::new_v4()),
                    name,
                    email,
                    initial_password,
                ))
                .bearer_auth(admin_token()?.0)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .context("parsing created user")?;
            println!("created user {} with id {}", user.username, user.id.0);
        }
        Command::ResetPassword { name, new_password } => {
            client
                .post(format!("{host}/api/admin/reset-password"))
                .json(&AdminResetPassword::new(name, new_password))
                .bearer_auth(admin_token()?.0)
                .send()
                .await?
                .error_for_status()?;
        }
    }

    Ok(())
}
