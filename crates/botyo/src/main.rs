use std::sync::Arc;

use botyo_core::{settings::Settings, Bot};
use botyo_telegram::TelegramChat;

#[tokio::main]
async fn main() -> Result<(), botyo_core::Error> {
    botyo_core::logging::init("botyo")?;

    let settings = Settings::load()?;
    let token = settings.require_telegram_token()?;

    let chat = Arc::new(TelegramChat::from_token(token).await?);

    let bot = Bot::builder()
        .configuration_file(settings.config_path.clone())
        .build(chat)?;

    bot.start().await?;
    tracing::info!(config = %settings.config_path.display(), "botyo is running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    bot.stop().await;
    tokio::time::sleep(settings.shutdown_grace).await;
    Ok(())
}
