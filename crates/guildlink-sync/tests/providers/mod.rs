mod discord_tests;
mod guild_tests;
mod jellyfin_tests;
mod mock_server;
