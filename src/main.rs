fn main() -> anyhow::Result<()> {
    bag_manager_lib::run()
}
