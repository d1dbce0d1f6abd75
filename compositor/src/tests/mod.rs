// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod output;
mod sources;

pub mod testing {
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// initialize for testing
    pub fn init() {
        INIT.call_once(|| {
            gst::init().unwrap();
            env_logger::try_init().ok();
        });
    }

    /// return true if all given element factories are installed
    pub fn have_elements(names: &[&str]) -> bool {
        let missing: Vec<_> = names
            .iter()
            .filter(|name| gst::ElementFactory::find(name).is_none())
            .collect();

        if !missing.is_empty() {
            warn!("skipping test, missing elements: {missing:?}");
            return false;
        }
        true
    }
}
