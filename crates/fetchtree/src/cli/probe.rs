use anyhow::Result;

use super::TreeArg;

#[derive(Clone, Debug, clap::Args)]
pub struct ProbeArg {
    #[command(flatten)]
    pub tree: TreeArg,
}

impl ProbeArg {
    pub async fn run(self) -> Result<()> {
        let factory = self.tree.factory()?;
        let tree = self.tree.build(&factory)?;

        match tree.probe_size().await? {
            Some(size) => println!("{}: {size} bytes", tree.name()),
            None => println!("{}: size unavailable", tree.name()),
        }
        for (name, value) in tree.properties().iter() {
            println!("  {name} = {value}");
        }
        Ok(())
    }
}
