use kube::CustomResourceExt;
use pvc_operator::ObjectStore;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ObjectStore::crd())?);
    Ok(())
}
