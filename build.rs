fn main() {
    let target = std::env::var("TARGET").unwrap_or_default();
    let cortex_m3 = std::env::var_os("CARGO_FEATURE_CORTEX_M3").is_some();

    println!("cargo:rerun-if-changed=src/hal/cortex_m3/asm/context.s");

    // 只在启用 cortex_m3 且目标为 ARM 时汇编 PendSV 处理程序
    if cortex_m3 && target == "thumbv7m-none-eabi" {
        cc::Build::new()
            .file("src/hal/cortex_m3/asm/context.s")
            .compile("newt_cortex_m3_asm");
    }
}
