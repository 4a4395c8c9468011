use kube::CustomResourceExt;
use xyna_api::XynaFactoryService;

/*
 * Prints the CustomResourceDefinition, to be used as:
 *
 *   crdgen | kubectl apply -f -
 */
fn main() -> Result<(), serde_json::Error> {
    let crd = XynaFactoryService::crd();
    println!("{}", serde_json::to_string_pretty(&crd)?);
    Ok(())
}
