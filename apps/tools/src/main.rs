use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::StatusCode;
use shared::{
    domain::RoomId,
    protocol::{Poll, PollDescriptor},
};
use url::Url;
use uuid::Uuid;

const ANONYMOUS_TITLE: &str = "Anonymous poll";

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "PARTY_SERVER_URL", default_value = "http://127.0.0.1:1999")]
    server_url: Url,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Opens a poll in a freshly generated room and prints the room id.
    CreatePoll {
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "option", required = true)]
        options: Vec<String>,
    },
    GetPoll {
        room: String,
    },
    ClearPoll {
        room: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::CreatePoll { title, options } => {
            let room = random_room_id()?;
            let descriptor = build_descriptor(title, options)?;
            let body = serde_json::to_value(&descriptor)?;
            let poll = post_poll(&client, &cli.server_url, &room, &body)
                .await?
                .context("server did not keep the poll")?;
            println!("created room={room}");
            print_poll(&poll);
        }
        Command::GetPoll { room } => {
            let room = RoomId::new(room)?;
            let response = client
                .get(room_url(&cli.server_url, &room)?)
                .send()
                .await?;
            match read_poll(response).await? {
                Some(poll) => print_poll(&poll),
                None => println!("no poll in room={room}"),
            }
        }
        Command::ClearPoll { room } => {
            let room = RoomId::new(room)?;
            post_poll(&client, &cli.server_url, &room, &serde_json::json!({})).await?;
            println!("cleared room={room}");
        }
    }

    Ok(())
}

fn random_room_id() -> Result<RoomId> {
    let simple = Uuid::new_v4().simple().to_string();
    Ok(RoomId::new(&simple[..8])?)
}

/// Blank options are dropped; a missing or blank title becomes the anonymous one.
fn build_descriptor(title: Option<String>, options: Vec<String>) -> Result<PollDescriptor> {
    let options: Vec<String> = options
        .into_iter()
        .filter(|option| !option.trim().is_empty())
        .collect();
    if options.is_empty() {
        bail!("a poll needs at least one non-empty option");
    }
    let title = title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_TITLE.to_string());
    Ok(PollDescriptor { title, options })
}

fn room_url(server: &Url, room: &RoomId) -> Result<Url> {
    server
        .join(&format!("party/{room}"))
        .with_context(|| format!("cannot build room url from '{server}'"))
}

async fn post_poll(
    client: &reqwest::Client,
    server: &Url,
    room: &RoomId,
    body: &serde_json::Value,
) -> Result<Option<Poll>> {
    let response = client
        .post(room_url(server, room)?)
        .json(body)
        .send()
        .await?;
    read_poll(response).await
}

async fn read_poll(response: reqwest::Response) -> Result<Option<Poll>> {
    match response.status() {
        StatusCode::OK => Ok(Some(response.json::<Poll>().await?)),
        StatusCode::NOT_FOUND => Ok(None),
        status => {
            let body = response.text().await.unwrap_or_default();
            bail!("server answered {status}: {body}")
        }
    }
}

fn print_poll(poll: &Poll) {
    println!("{}", poll.title());
    for (index, (option, votes)) in poll.options().iter().zip(poll.votes()).enumerate() {
        println!("  [{index}] {option}: {votes}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_drops_blank_options_and_defaults_title() {
        let descriptor = build_descriptor(
            Some("  ".into()),
            vec!["Tacos".into(), " ".into(), "Ramen".into()],
        )
        .expect("descriptor");
        assert_eq!(descriptor.title, ANONYMOUS_TITLE);
        assert_eq!(descriptor.options, vec!["Tacos".to_string(), "Ramen".to_string()]);
    }

    #[test]
    fn descriptor_needs_an_option() {
        assert!(build_descriptor(Some("Lunch".into()), vec!["".into()]).is_err());
    }

    #[test]
    fn room_urls_keep_server_prefix() {
        let server = Url::parse("http://127.0.0.1:1999/").expect("url");
        let room = RoomId::new("k3j9x0ab").expect("room");
        assert_eq!(
            room_url(&server, &room).expect("room url").as_str(),
            "http://127.0.0.1:1999/party/k3j9x0ab"
        );
    }

    #[test]
    fn generated_room_ids_are_short_and_valid() {
        let room = random_room_id().expect("room");
        assert_eq!(room.as_str().len(), 8);
    }
}
