#[rocket::launch]
fn rocket() -> _ {
    focus_server::rocket()
}
