fn main() -> anyhow::Result<()> {
    simexec::run()
}
