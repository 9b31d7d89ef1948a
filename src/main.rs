#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    csv_import_server::rocket()
}
