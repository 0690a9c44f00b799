#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    racun_server::run().await?;
    Ok(())
}
