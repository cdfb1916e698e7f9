use business_controllers::api::v1::{
    chartgroup::ChartGroup, identity::IdentityProvider, imagenamespace::ImageNamespace,
    namespace::Namespace, nsemigration::NsEmigration, platform::Platform, project::Project,
    registry::{RegistryChartGroup, RegistryNamespace},
};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        Project::crd(),
        Namespace::crd(),
        ChartGroup::crd(),
        ImageNamespace::crd(),
        Platform::crd(),
        NsEmigration::crd(),
        RegistryChartGroup::crd(),
        RegistryNamespace::crd(),
        IdentityProvider::crd(),
    ];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
