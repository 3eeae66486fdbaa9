//! Build script for fakehttp-ipt6
//!
//! Handles compile-time configuration for distro packagers and embeds
//! build-time information (git commit, dirty status, build timestamp).

fn main() {
    // Re-run build if the packager-provided ip6tables path changes
    println!("cargo:rerun-if-env-changed=FAKEHTTP_SYSTEM_IP6TABLES");

    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
