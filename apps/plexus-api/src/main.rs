use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = plexus_api::Args::parse();
	plexus_api::run(args).await
}
