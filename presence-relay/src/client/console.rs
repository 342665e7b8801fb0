use std::io;

use chrono::Local;
use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Color, Stylize},
    terminal::{Clear, ClearType},
};
use tokio::io::AsyncWriteExt;

use crate::{commands::HELP, palette::AliasPalette, presence::Update};

/// Terminal output for one chat session.
pub struct Console {
    color: bool,
    bell: bool,
    palette: AliasPalette,
}

impl Console {
    pub fn new(color: bool, bell: bool) -> Self {
        Self {
            color,
            bell,
            palette: AliasPalette::new(),
        }
    }

    pub async fn render(&self, update: Update) -> io::Result<()> {
        match update {
            Update::Seeded | Update::SelfEcho => Ok(()),
            Update::Joined(alias) => {
                let text = format!("{alias} joined the chat");
                self.system(&text, |s| s.with(Color::Green).bold().to_string())
                    .await
            }
            Update::Left(alias) => {
                let text = format!("{alias} left the chat");
                self.system(&text, |s| s.with(Color::Red).dim().to_string())
                    .await
            }
            Update::Message { alias, text } => {
                if self.bell {
                    write_stdout_raw(b"\x07").await?;
                }
                let color = self.palette.color_for(&alias).await;
                let name = self.paint(format!("{alias}:"), |s| s.with(color).to_string());
                write_stdout(&format!("{} {name} {text}", self.timestamp())).await
            }
        }
    }

    /// Echo of a message we just sent.
    pub async fn own(&self, text: &str) -> io::Result<()> {
        let name = self.paint("You:".to_string(), |s| s.with(Color::Green).to_string());
        write_stdout(&format!("{} {name} {text}", self.timestamp())).await
    }

    pub async fn info(&self, text: &str) -> io::Result<()> {
        write_stdout(&self.paint(text.to_string(), |s| s.with(Color::Magenta).to_string())).await
    }

    pub async fn banner(&self, transport: &str, alias: &str, server: &str) -> io::Result<()> {
        self.info(&format!("════════ {transport} CHAT ════════"))
            .await?;
        self.info(&format!("Alias: {alias}")).await?;
        self.info(&format!("Server: {server}")).await?;
        self.info("Ctrl+C or /quit to exit").await?;
        write_stdout("").await?;
        self.help().await
    }

    pub async fn help(&self) -> io::Result<()> {
        self.info("Available commands:").await?;
        for (command, description) in HELP {
            write_stdout(&format!("  {command:<8} - {description}")).await?;
        }
        write_stdout("").await
    }

    pub async fn users(&self, users: &[String], me: &str) -> io::Result<()> {
        self.info("Connected users:").await?;
        for user in users {
            if user == me {
                write_stdout(&format!("  - {user} (you)")).await?;
            } else {
                let color = self.palette.color_for(user).await;
                let name = self.paint(user.clone(), |s| s.with(color).to_string());
                write_stdout(&format!("  - {name}")).await?;
            }
        }
        write_stdout("").await
    }

    pub async fn clear(&self) -> io::Result<()> {
        let mut buf = Vec::new();
        queue!(buf, Clear(ClearType::All), MoveTo(0, 0))?;
        write_stdout_raw(&buf).await?;
        self.info("Screen cleared.").await
    }

    pub async fn connection_closed(&self) -> io::Result<()> {
        write_stdout("[!] Connection closed by server.").await
    }

    async fn system(&self, text: &str, style: impl Fn(String) -> String) -> io::Result<()> {
        let line = format!("{} {}", self.timestamp(), self.paint(text.to_string(), style));
        write_stdout(&line).await
    }

    fn timestamp(&self) -> String {
        let stamp = format!("[{}]", Local::now().format("%H:%M"));
        self.paint(stamp, |s| s.dim().to_string())
    }

    fn paint(&self, text: String, style: impl Fn(String) -> String) -> String {
        if self.color { style(text) } else { text }
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stdout_raw(bytes: &[u8]) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await?;
    stdout.flush().await
}
