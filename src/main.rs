use anyhow::Context;

fn main() -> anyhow::Result<()> {
    cmi5_lrs::run().context("cmi5-lrs failed")?;
    Ok(())
}
